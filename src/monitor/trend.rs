//! 单用户趋势监控：拉取历史 K 线交给分析器打分，检测趋势方向
//! 变化后发送提醒。指标计算本身在 [`TrendAnalyzer`] 之后。

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::common::error::MonitorError;
use crate::config::resolver::EffectiveTrend;
use crate::monitor::analysis::{TrendAnalyzer, TrendDirection};
use crate::monitor::market::MarketDataSource;
use crate::monitor::notify::{self, NotificationMessage, NotificationSink};
use crate::monitor::session::MarketSession;
use crate::monitor::CycleOutcome;

// 趋势方向历史长度，变化检测只看最近两个方向
const DIRECTION_HISTORY_CAP: usize = 16;
const CHANGE_WINDOW: usize = 2;

pub struct TrendMonitor {
    user_key: String,
    config: EffectiveTrend,
    direction_history: HashMap<String, VecDeque<TrendDirection>>,
    last_notification: HashMap<String, DateTime<Utc>>,
}

impl TrendMonitor {
    pub fn new(user_key: &str, config: EffectiveTrend) -> Self {
        Self {
            user_key: user_key.to_string(),
            config,
            direction_history: HashMap::new(),
            last_notification: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EffectiveTrend {
        &self.config
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.config.params.poll_interval_secs
    }

    pub fn last_notification(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_notification.get(symbol).copied()
    }

    /// 原地切换配置，存续代码的方向历史与通知时间保留。
    pub fn apply_config(&mut self, new_config: EffectiveTrend) {
        self.direction_history
            .retain(|symbol, _| new_config.symbols.contains(symbol));
        self.last_notification
            .retain(|symbol, _| new_config.symbols.contains(symbol));
        self.config = new_config;
        info!("用户 {} 的趋势监控配置已更新", self.user_key);
    }

    /// 最近 window 个方向中是否发生变化，返回（变化前，当前）。
    fn detect_change(history: &VecDeque<TrendDirection>) -> Option<(TrendDirection, TrendDirection)> {
        if history.len() < CHANGE_WINDOW {
            return None;
        }
        let current = *history.back()?;
        let previous = history[history.len() - CHANGE_WINDOW];
        if previous == current {
            None
        } else {
            Some((previous, current))
        }
    }

    /// 盘中总是评估；盘前、盘后由用户的对应通知开关决定；休市跳过。
    pub async fn run_cycle(
        &mut self,
        session: MarketSession,
        market: &dyn MarketDataSource,
        sink: &dyn NotificationSink,
        analyzer: &dyn TrendAnalyzer,
    ) -> Result<CycleOutcome, MonitorError> {
        let session_allowed = match session {
            MarketSession::Regular => true,
            MarketSession::PreMarket => self.config.params.pre_market_notification,
            MarketSession::PostMarket => self.config.params.post_market_notification,
            MarketSession::Closed => false,
        };
        if !session_allowed {
            debug!("用户 {} 当前时段（{}）不做趋势评估", self.user_key, session);
            return Ok(CycleOutcome::Skipped);
        }
        if self.config.symbols.is_empty() {
            return Ok(CycleOutcome::Completed { notifications: 0 });
        }

        let symbols = self.config.symbols.clone();
        let mut notifications = 0;
        let mut fetched_any = false;

        for symbol in &symbols {
            let bars = match market
                .fetch_history(symbol, self.config.params.history_window_days)
                .await
            {
                Ok(bars) => bars,
                Err(err) => {
                    warn!("用户 {}: {} 历史数据不可用，跳过: {}", self.user_key, symbol, err);
                    continue;
                }
            };
            fetched_any = true;

            let Some(signal) = analyzer.analyze(symbol, &bars, &self.config.params) else {
                debug!("用户 {}: {} 数据不足，暂无趋势信号", self.user_key, symbol);
                continue;
            };
            if !signal.score.is_finite() {
                return Err(MonitorError::InvalidData(format!(
                    "{} 的趋势得分非法: {}",
                    symbol, signal.score
                )));
            }

            let history = self.direction_history.entry(symbol.clone()).or_default();
            history.push_back(signal.direction);
            if history.len() > DIRECTION_HISTORY_CAP {
                history.pop_front();
            }

            let Some((previous, current)) = Self::detect_change(history) else {
                continue;
            };

            // 信号强度需要达到对应方向的阈值
            let required = match current {
                TrendDirection::Up => self.config.params.buy_signal_threshold,
                TrendDirection::Down => self.config.params.sell_signal_threshold,
                TrendDirection::Sideways => {
                    debug!("用户 {}: {} 转入震荡，不通知", self.user_key, symbol);
                    continue;
                }
            };
            if signal.score < required {
                debug!(
                    "用户 {}: {} 趋势变化但得分 {:.2} 低于阈值 {:.2}",
                    self.user_key, symbol, signal.score, required
                );
                continue;
            }

            let interval =
                Duration::minutes(self.config.params.notification_interval_minutes as i64);
            if let Some(last) = self.last_notification.get(symbol) {
                if Utc::now() - *last < interval {
                    debug!(
                        "用户 {}: {} 趋势变化但在通知间隔内",
                        self.user_key, symbol
                    );
                    continue;
                }
            }

            let message = NotificationMessage {
                subject: format!("趋势变化提醒: {} {} -> {}", symbol, previous, current),
                body: format!(
                    "{} 趋势由{}转为{}，信号强度 {:.2}（阈值 {:.2}）",
                    symbol, previous, current, signal.score, required
                ),
            };

            if notify::deliver(sink, &self.user_key, &message).await {
                self.last_notification.insert(symbol.clone(), Utc::now());
                notifications += 1;
                info!(
                    "用户 {}: {} 趋势 {} -> {} 已通知",
                    self.user_key, symbol, previous, current
                );
            }
        }

        if !fetched_any {
            return Ok(CycleOutcome::Skipped);
        }
        Ok(CycleOutcome::Completed { notifications })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::{MarketDataError, NotificationError};
    use crate::config::resolver::TrendParams;
    use crate::monitor::analysis::TrendSignal;
    use crate::monitor::market::{PriceBar, PriceSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct BarMarket;

    #[async_trait]
    impl MarketDataSource for BarMarket {
        async fn fetch_current(
            &self,
            _symbols: &[String],
        ) -> Result<HashMap<String, PriceSnapshot>, MarketDataError> {
            Err(MarketDataError::Unavailable("not scripted".to_string()))
        }

        async fn fetch_history(
            &self,
            _symbol: &str,
            _window_days: usize,
        ) -> Result<Vec<PriceBar>, MarketDataError> {
            Ok(vec![PriceBar {
                timestamp: Utc::now(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 1_000.0,
            }])
        }
    }

    struct DownMarket;

    #[async_trait]
    impl MarketDataSource for DownMarket {
        async fn fetch_current(
            &self,
            _symbols: &[String],
        ) -> Result<HashMap<String, PriceSnapshot>, MarketDataError> {
            Err(MarketDataError::Unavailable("down".to_string()))
        }

        async fn fetch_history(
            &self,
            _symbol: &str,
            _window_days: usize,
        ) -> Result<Vec<PriceBar>, MarketDataError> {
            Err(MarketDataError::Unavailable("down".to_string()))
        }
    }

    /// 按脚本顺序给出趋势方向的分析器
    struct ScriptedAnalyzer {
        directions: Mutex<VecDeque<TrendDirection>>,
        score: f64,
    }

    impl ScriptedAnalyzer {
        fn new(directions: Vec<TrendDirection>, score: f64) -> Self {
            Self {
                directions: Mutex::new(directions.into()),
                score,
            }
        }
    }

    impl TrendAnalyzer for ScriptedAnalyzer {
        fn analyze(
            &self,
            symbol: &str,
            _bars: &[PriceBar],
            _params: &TrendParams,
        ) -> Option<TrendSignal> {
            let direction = self.directions.lock().unwrap().pop_front()?;
            Some(TrendSignal {
                symbol: symbol.to_string(),
                direction,
                score: self.score,
            })
        }
    }

    struct CountingSink {
        sent: Mutex<Vec<String>>,
    }

    impl CountingSink {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn send(
            &self,
            _user_key: &str,
            message: &NotificationMessage,
        ) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push(message.subject.clone());
            Ok(())
        }
    }

    fn trend_params() -> TrendParams {
        TrendParams {
            poll_interval_secs: 1800,
            history_window_days: 90,
            up_trend_threshold: 3,
            down_trend_threshold: 3,
            buy_signal_threshold: 0.8,
            sell_signal_threshold: 0.8,
            notification_interval_minutes: 60,
            pre_market_notification: false,
            post_market_notification: false,
            signal_weights: HashMap::new(),
        }
    }

    fn trend_monitor() -> TrendMonitor {
        TrendMonitor::new(
            "a@x.com",
            EffectiveTrend {
                symbols: vec!["AAPL".to_string()],
                params: trend_params(),
            },
        )
    }

    #[tokio::test]
    async fn test_trend_change_triggers_notification() {
        let market = BarMarket;
        let sink = CountingSink::new();
        let analyzer =
            ScriptedAnalyzer::new(vec![TrendDirection::Up, TrendDirection::Down], 0.9);
        let mut mon = trend_monitor();

        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(sink.count(), 0); // 只有一个方向，还谈不上变化

        let outcome = mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { notifications: 1 });
        assert_eq!(sink.count(), 1);
        assert!(mon.last_notification("AAPL").is_some());
    }

    #[tokio::test]
    async fn test_stable_trend_is_quiet() {
        let market = BarMarket;
        let sink = CountingSink::new();
        let analyzer =
            ScriptedAnalyzer::new(vec![TrendDirection::Up, TrendDirection::Up], 0.9);
        let mut mon = trend_monitor();

        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_weak_signal_below_threshold_is_quiet() {
        let market = BarMarket;
        let sink = CountingSink::new();
        let analyzer =
            ScriptedAnalyzer::new(vec![TrendDirection::Up, TrendDirection::Down], 0.5);
        let mut mon = trend_monitor();

        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_all_symbols_unavailable_skips_cycle() {
        let market = DownMarket;
        let sink = CountingSink::new();
        let analyzer = ScriptedAnalyzer::new(vec![], 0.9);
        let mut mon = trend_monitor();

        let outcome = mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_session_flags_gate_pre_and_post_market() {
        let market = BarMarket;
        let sink = CountingSink::new();
        let analyzer =
            ScriptedAnalyzer::new(vec![TrendDirection::Up, TrendDirection::Up], 0.9);

        // 盘前通知关闭：直接跳过，不消耗分析脚本
        let mut mon = trend_monitor();
        let outcome = mon.run_cycle(MarketSession::PreMarket, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped);

        // 盘前通知开启：正常评估
        let mut params = trend_params();
        params.pre_market_notification = true;
        let mut mon = TrendMonitor::new(
            "a@x.com",
            EffectiveTrend {
                symbols: vec!["AAPL".to_string()],
                params,
            },
        );
        let outcome = mon.run_cycle(MarketSession::PreMarket, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { notifications: 0 });

        // 休市一律跳过
        let outcome = mon.run_cycle(MarketSession::Closed, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_notification_interval_throttles_repeat_changes() {
        let market = BarMarket;
        let sink = CountingSink::new();
        // 方向来回摆动，每轮都构成变化
        let analyzer = ScriptedAnalyzer::new(
            vec![TrendDirection::Up, TrendDirection::Down, TrendDirection::Up],
            0.9,
        );
        let mut mon = trend_monitor();

        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(sink.count(), 1);

        // 第三轮仍是趋势变化，但在通知间隔内
        mon.run_cycle(MarketSession::Regular, &market, &sink, &analyzer).await.unwrap();
        assert_eq!(sink.count(), 1);
    }
}
