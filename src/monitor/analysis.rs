//! 趋势分析接口。EMA/MACD/RSI/ADX 等指标计算在本 crate 之外实现，
//! 这里只约定输入输出形态。

use crate::config::resolver::TrendParams;
use crate::monitor::market::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "上升"),
            TrendDirection::Down => write!(f, "下降"),
            TrendDirection::Sideways => write!(f, "震荡"),
        }
    }
}

/// 单个代码的趋势分析结果，score 为加权信号强度（0.0 - 1.0）。
#[derive(Debug, Clone)]
pub struct TrendSignal {
    pub symbol: String,
    pub direction: TrendDirection,
    pub score: f64,
}

/// 趋势分析器。纯计算接口：给定历史 K 线与合并后的参数
/// （含 signal_weights），返回当前趋势信号；数据不足时返回 `None`。
pub trait TrendAnalyzer: Send + Sync {
    fn analyze(&self, symbol: &str, bars: &[PriceBar], params: &TrendParams)
    -> Option<TrendSignal>;
}

/// 空分析器：永远不产生信号。干跑模式使用。
pub struct NullAnalyzer;

impl TrendAnalyzer for NullAnalyzer {
    fn analyze(
        &self,
        _symbol: &str,
        _bars: &[PriceBar],
        _params: &TrendParams,
    ) -> Option<TrendSignal> {
        None
    }
}
