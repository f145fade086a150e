mod api;

pub use api::{
    CacheSettingsInfo, HealthResponse, RateLimitSettingsInfo, ReadinessResponse, SessionResponse,
    StatsResponse,
};
