//! 单用户波动监控：对比相邻两轮的价格快照，超过阈值百分比且
//! 不在通知间隔内时发送提醒。

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::common::error::MonitorError;
use crate::config::resolver::EffectiveFluctuation;
use crate::monitor::market::MarketDataSource;
use crate::monitor::notify::{self, NotificationMessage, NotificationSink};
use crate::monitor::session::MarketSession;
use crate::monitor::CycleOutcome;

// 每个代码最多保留最近 60 个价格点
const PRICE_HISTORY_CAP: usize = 60;

pub struct FluctuationMonitor {
    user_key: String,
    config: EffectiveFluctuation,
    price_history: HashMap<String, VecDeque<(DateTime<Utc>, f64)>>,
    last_notification: HashMap<String, DateTime<Utc>>,
}

impl FluctuationMonitor {
    pub fn new(user_key: &str, config: EffectiveFluctuation) -> Self {
        let mut price_history = HashMap::new();
        for symbol in &config.symbols {
            price_history.insert(symbol.clone(), VecDeque::with_capacity(PRICE_HISTORY_CAP));
        }
        Self {
            user_key: user_key.to_string(),
            config,
            price_history,
            last_notification: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EffectiveFluctuation {
        &self.config
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.config.params.poll_interval_secs
    }

    pub fn last_notification(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_notification.get(symbol).copied()
    }

    /// 原地切换配置。保留存续代码的价格历史与上次通知时间，
    /// 避免重载后立即重复通知；被移除的代码状态一并清理。
    pub fn apply_config(&mut self, new_config: EffectiveFluctuation) {
        self.price_history
            .retain(|symbol, _| new_config.symbols.contains(symbol));
        self.last_notification
            .retain(|symbol, _| new_config.symbols.contains(symbol));
        for symbol in &new_config.symbols {
            self.price_history
                .entry(symbol.clone())
                .or_insert_with(|| VecDeque::with_capacity(PRICE_HISTORY_CAP));
        }
        self.config = new_config;
        info!("用户 {} 的波动监控配置已更新", self.user_key);
    }

    /// 执行一轮评估。行情不可用按跳过处理；无效价格（非有限或非正，
    /// 行情端以 0 表示无数据）只跳过该代码本轮的评估。
    /// 波动监控覆盖盘前、盘中、盘后，休市时段直接跳过。
    /// 本轮超阈值的代码合并成一封通知发送。
    pub async fn run_cycle(
        &mut self,
        session: MarketSession,
        market: &dyn MarketDataSource,
        sink: &dyn NotificationSink,
    ) -> Result<CycleOutcome, MonitorError> {
        if session == MarketSession::Closed {
            debug!("用户 {} 休市中，波动监控暂停", self.user_key);
            return Ok(CycleOutcome::Skipped);
        }
        if self.config.symbols.is_empty() {
            return Ok(CycleOutcome::Completed { notifications: 0 });
        }

        let snapshots = match market.fetch_current(&self.config.symbols).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!("用户 {} 的波动监控本轮跳过: {}", self.user_key, err);
                return Ok(CycleOutcome::Skipped);
            }
        };

        let now = Utc::now();
        let symbols = self.config.symbols.clone();
        // (代码, 前值, 现价, 涨跌幅)
        let mut triggered: Vec<(String, f64, f64, f64)> = Vec::new();

        for symbol in &symbols {
            let Some(snapshot) = snapshots.get(symbol) else {
                debug!("用户 {}: {} 无实时价格，跳过", self.user_key, symbol);
                continue;
            };
            if !snapshot.price.is_finite() || snapshot.price <= 0.0 {
                warn!(
                    "用户 {}: {} 返回无效价格 {}，本轮跳过该代码",
                    self.user_key, symbol, snapshot.price
                );
                continue;
            }

            let history = self.price_history.entry(symbol.clone()).or_default();
            let previous = history.back().map(|(_, price)| *price);
            history.push_back((snapshot.timestamp, snapshot.price));
            if history.len() > PRICE_HISTORY_CAP {
                history.pop_front();
            }

            // 首轮只记录基线
            let Some(previous) = previous else {
                continue;
            };

            let change_percent = (snapshot.price - previous) / previous * 100.0;
            if change_percent.abs() < self.config.params.threshold_percent {
                debug!(
                    "用户 {}: {} 波动 {:.2}% 未达阈值 {}%",
                    self.user_key, symbol, change_percent, self.config.params.threshold_percent
                );
                continue;
            }

            let interval =
                Duration::minutes(self.config.params.notification_interval_minutes as i64);
            if let Some(last) = self.last_notification.get(symbol) {
                if now - *last < interval {
                    debug!(
                        "用户 {}: {} 波动达到阈值但在通知间隔内",
                        self.user_key, symbol
                    );
                    continue;
                }
            }

            triggered.push((symbol.clone(), previous, snapshot.price, change_percent));
        }

        if triggered.is_empty() {
            return Ok(CycleOutcome::Completed { notifications: 0 });
        }

        // 本轮全部超阈值的代码合并成一封通知；投递失败不记录通知
        // 时间，下一轮达到阈值时重新尝试
        let message = batch_message(&triggered, self.config.params.threshold_percent);
        if notify::deliver(sink, &self.user_key, &message).await {
            for (symbol, _, _, change_percent) in &triggered {
                self.last_notification.insert(symbol.clone(), now);
                info!(
                    "用户 {}: {} 波动 {:+.2}% 已通知",
                    self.user_key, symbol, change_percent
                );
            }
            return Ok(CycleOutcome::Completed { notifications: 1 });
        }
        Ok(CycleOutcome::Completed { notifications: 0 })
    }
}

fn batch_message(triggered: &[(String, f64, f64, f64)], threshold: f64) -> NotificationMessage {
    let subject = match triggered {
        [(symbol, _, _, change_percent)] => {
            format!("股价波动提醒: {} {:+.2}%", symbol, change_percent)
        }
        _ => format!("股价波动提醒: {} 只股票异动", triggered.len()),
    };
    let mut lines: Vec<String> = triggered
        .iter()
        .map(|(symbol, previous, price, change_percent)| {
            format!(
                "{} 当前价格 {:.2}，较上一次记录 {:.2} 变动 {:+.2}%",
                symbol, price, previous, change_percent
            )
        })
        .collect();
    lines.push(format!("（波动阈值 {}%）", threshold));
    NotificationMessage {
        subject,
        body: lines.join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::{MarketDataError, NotificationError};
    use crate::config::resolver::FluctuationParams;
    use crate::monitor::market::PriceSnapshot;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedMarket {
        // 每轮一组 (代码, 价格)
        rounds: Mutex<VecDeque<Vec<(&'static str, f64)>>>,
    }

    impl ScriptedMarket {
        fn new(rounds: Vec<Vec<(&'static str, f64)>>) -> Self {
            Self {
                rounds: Mutex::new(rounds.into()),
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedMarket {
        async fn fetch_current(
            &self,
            _symbols: &[String],
        ) -> Result<HashMap<String, PriceSnapshot>, MarketDataError> {
            let round = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| MarketDataError::Unavailable("script exhausted".to_string()))?;
            Ok(round
                .into_iter()
                .map(|(symbol, price)| {
                    (
                        symbol.to_string(),
                        PriceSnapshot {
                            symbol: symbol.to_string(),
                            price,
                            timestamp: Utc::now(),
                        },
                    )
                })
                .collect())
        }

        async fn fetch_history(
            &self,
            _symbol: &str,
            _window_days: usize,
        ) -> Result<Vec<crate::monitor::market::PriceBar>, MarketDataError> {
            Err(MarketDataError::Unavailable("not scripted".to_string()))
        }
    }

    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        failures_remaining: Mutex<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failures_remaining: Mutex::new(0),
            }
        }

        fn failing_first(n: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failures_remaining: Mutex::new(n),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn last_sent(&self) -> Option<(String, String)> {
            self.sent.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(
            &self,
            _user_key: &str,
            message: &NotificationMessage,
        ) -> Result<(), NotificationError> {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(NotificationError::Delivery("scripted failure".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((message.subject.clone(), message.body.clone()));
            Ok(())
        }
    }

    fn monitor(threshold: f64) -> FluctuationMonitor {
        FluctuationMonitor::new(
            "a@x.com",
            EffectiveFluctuation {
                symbols: vec!["AAPL".to_string()],
                params: FluctuationParams {
                    threshold_percent: threshold,
                    notification_interval_minutes: 5,
                    poll_interval_secs: 60,
                },
            },
        )
    }

    #[tokio::test]
    async fn test_threshold_crossing_notifies_once() {
        let market = ScriptedMarket::new(vec![
            vec![("AAPL", 100.0)],
            vec![("AAPL", 103.0)], // +3% > 2% 阈值
        ]);
        let sink = RecordingSink::new();
        let mut mon = monitor(2.0);

        let first = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(first, CycleOutcome::Completed { notifications: 0 });

        let second = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(second, CycleOutcome::Completed { notifications: 1 });
        assert_eq!(sink.sent_count(), 1);
        assert!(mon.last_notification("AAPL").is_some());
    }

    #[tokio::test]
    async fn test_below_threshold_is_quiet() {
        let market = ScriptedMarket::new(vec![
            vec![("AAPL", 100.0)],
            vec![("AAPL", 100.5)], // +0.5% < 2%
        ]);
        let sink = RecordingSink::new();
        let mut mon = monitor(2.0);

        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(sink.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_notification_interval_throttles() {
        let market = ScriptedMarket::new(vec![
            vec![("AAPL", 100.0)],
            vec![("AAPL", 105.0)],
            vec![("AAPL", 110.0)], // 再次超阈值，但仍在 5 分钟间隔内
        ]);
        let sink = RecordingSink::new();
        let mut mon = monitor(2.0);

        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(sink.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_data_skips_cycle() {
        let market = ScriptedMarket::new(vec![]); // 立即耗尽 -> Unavailable
        let sink = RecordingSink::new();
        let mut mon = monitor(2.0);

        let outcome = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_delivery_retries_once_then_succeeds() {
        let market = ScriptedMarket::new(vec![vec![("AAPL", 100.0)], vec![("AAPL", 105.0)]]);
        let sink = RecordingSink::failing_first(1);
        let mut mon = monitor(2.0);

        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        let outcome = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { notifications: 1 });
        assert_eq!(sink.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_delivery_dropped_after_retry_allows_next_cycle() {
        let market = ScriptedMarket::new(vec![
            vec![("AAPL", 100.0)],
            vec![("AAPL", 105.0)], // 两次投递都失败
            vec![("AAPL", 110.0)], // 下一轮重新尝试
        ]);
        let sink = RecordingSink::failing_first(2);
        let mut mon = monitor(2.0);

        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        let dropped = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(dropped, CycleOutcome::Completed { notifications: 0 });
        // 投递失败不记录通知时间
        assert!(mon.last_notification("AAPL").is_none());

        let retried = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(retried, CycleOutcome::Completed { notifications: 1 });
    }

    #[tokio::test]
    async fn test_invalid_price_skips_symbol_not_task() {
        // NaN 和 0（行情端的"无数据"）都只跳过该代码，任务继续
        let market = ScriptedMarket::new(vec![
            vec![("AAPL", f64::NAN)],
            vec![("AAPL", 0.0)],
            vec![("AAPL", 100.0)],
            vec![("AAPL", 105.0)],
        ]);
        let sink = RecordingSink::new();
        let mut mon = monitor(2.0);

        let first = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(first, CycleOutcome::Completed { notifications: 0 });
        let second = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(second, CycleOutcome::Completed { notifications: 0 });

        // 无效价格没有污染价格历史：100 是首个基线，105 触发通知
        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        let fourth = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        assert_eq!(fourth, CycleOutcome::Completed { notifications: 1 });
    }

    #[tokio::test]
    async fn test_closed_session_pauses_monitoring() {
        let market = ScriptedMarket::new(vec![vec![("AAPL", 100.0)]]);
        let sink = RecordingSink::new();
        let mut mon = monitor(2.0);

        let outcome = mon.run_cycle(MarketSession::Closed, &market, &sink).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped);

        // 休市时不消耗行情请求，开盘后照常建立基线
        let next = mon.run_cycle(MarketSession::PreMarket, &market, &sink).await.unwrap();
        assert_eq!(next, CycleOutcome::Completed { notifications: 0 });
    }

    #[tokio::test]
    async fn test_triggered_symbols_batch_into_one_notification() {
        let market = ScriptedMarket::new(vec![
            vec![("AAPL", 100.0), ("TSLA", 50.0)],
            vec![("AAPL", 105.0), ("TSLA", 53.0)],
        ]);
        let sink = RecordingSink::new();
        let mut mon = FluctuationMonitor::new(
            "a@x.com",
            EffectiveFluctuation {
                symbols: vec!["AAPL".to_string(), "TSLA".to_string()],
                params: FluctuationParams {
                    threshold_percent: 2.0,
                    notification_interval_minutes: 5,
                    poll_interval_secs: 60,
                },
            },
        );

        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        let outcome = mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();

        // 两只股票同轮超阈值，合并成一封通知
        assert_eq!(outcome, CycleOutcome::Completed { notifications: 1 });
        assert_eq!(sink.sent_count(), 1);
        let (subject, body) = sink.last_sent().unwrap();
        assert!(subject.contains("2 只"));
        assert!(body.contains("AAPL") && body.contains("TSLA"));
        assert!(mon.last_notification("AAPL").is_some());
        assert!(mon.last_notification("TSLA").is_some());
    }

    #[tokio::test]
    async fn test_apply_config_preserves_surviving_symbol_state() {
        let market = ScriptedMarket::new(vec![vec![("AAPL", 100.0)], vec![("AAPL", 105.0)]]);
        let sink = RecordingSink::new();
        let mut mon = monitor(2.0);

        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        mon.run_cycle(MarketSession::Regular, &market, &sink).await.unwrap();
        let stamp = mon.last_notification("AAPL").unwrap();

        mon.apply_config(EffectiveFluctuation {
            symbols: vec!["AAPL".to_string(), "TSLA".to_string()],
            params: FluctuationParams {
                threshold_percent: 5.0,
                notification_interval_minutes: 10,
                poll_interval_secs: 60,
            },
        });

        // 存续代码的通知时间保留，防止重载后立即重复通知
        assert_eq!(mon.last_notification("AAPL"), Some(stamp));
        assert_eq!(mon.config().params.threshold_percent, 5.0);
    }
}
