use crate::model::Ms;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_PLACES_PER_TENANT: usize = 1_000;
pub const MAX_ADMINS_PER_TENANT: usize = 100;
pub const MAX_REQUESTS_PER_PLACE: usize = 100_000;
pub const MAX_PHOTOS_PER_PLACE: usize = 50;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LINK_LEN: usize = 2_048;
pub const MIN_MESSAGE_LEN: usize = 20;
pub const MAX_MESSAGE_LEN: usize = 4_096;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_HORIZON_DAYS: u32 = 366;
/// Hours one day of a slot plan may cover.
pub const MAX_PLAN_HOURS_PER_DAY: u32 = 24;
