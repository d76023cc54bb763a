//! 美股交易时段判定：盘前 4:00-9:30、盘中 9:30-16:00、盘后
//! 16:00-20:00（交易所当地时间），周末休市。

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    Closed,
    PreMarket,
    Regular,
    PostMarket,
}

impl std::fmt::Display for MarketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketSession::Closed => write!(f, "休市"),
            MarketSession::PreMarket => write!(f, "盘前"),
            MarketSession::Regular => write!(f, "盘中"),
            MarketSession::PostMarket => write!(f, "盘后"),
        }
    }
}

// 时段边界，交易所当地时间的分钟数
const PRE_OPEN_MIN: u32 = 4 * 60;
const REGULAR_OPEN_MIN: u32 = 9 * 60 + 30;
const REGULAR_CLOSE_MIN: u32 = 16 * 60;
const POST_CLOSE_MIN: u32 = 20 * 60;

/// 判定给定时刻所处的交易时段。
///
/// 时区换算交给 [`chrono_tz`]，夏令时切换自动生效。
/// 只区分周末，交易所节假日不在判定范围内。
pub fn market_session(now: DateTime<Utc>, tz: Tz) -> MarketSession {
    let local = now.with_timezone(&tz);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return MarketSession::Closed;
    }

    let minutes = local.hour() * 60 + local.minute();
    if (PRE_OPEN_MIN..REGULAR_OPEN_MIN).contains(&minutes) {
        MarketSession::PreMarket
    } else if (REGULAR_OPEN_MIN..REGULAR_CLOSE_MIN).contains(&minutes) {
        MarketSession::Regular
    } else if (REGULAR_CLOSE_MIN..POST_CLOSE_MIN).contains(&minutes) {
        MarketSession::PostMarket
    } else {
        MarketSession::Closed
    }
}
