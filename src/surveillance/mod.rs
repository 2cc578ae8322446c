// trade surveillance. pre-trade checks, rate limiting and post-trade pattern
// detection. findings go to the compliance registry

mod detectors;
mod engine;
mod pretrade;
mod rate_limit;
mod report;

pub use detectors::{default_detectors, LayeringDetector, PatternDetector, SpoofingDetector, WashTradeDetector};
pub use engine::{PositionLimitStatus, SurveillanceEngine};
pub use pretrade::{PreTradeCheck, PreTradeError, PreTradeWarning};
pub use rate_limit::{RateCheck, RateLimiter};
pub use report::ComplianceReport;
