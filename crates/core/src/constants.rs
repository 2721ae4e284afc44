/// Postgres SQLSTATE for unique constraint violations
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

/// PostgREST code for a `.single()` read that matched no row
pub const NO_ROWS_CODE: &str = "PGRST116";

/// Maximum length of an audience name, in characters
pub const AUDIENCE_NAME_MAX_LEN: usize = 100;

/// Owner column on the `leads` and `audiences` tables
pub const OWNER_COLUMN: &str = "user_id";

/// Column used for newest-first ordering
pub const CREATED_AT_COLUMN: &str = "created_at";

pub const PROFILE_COLUMNS: &str =
    "plan,total_credits,used_credits,credits_left,trial_ends_at,subscription_end_at";

pub const AUDIENCE_COLUMNS: &str =
    "id,name,description,created_at,leads(id,full_name,profile_url,headline,source_operation,created_at)";

pub const LEAD_COLUMNS: &str =
    "id,audience_id,full_name,profile_url,headline,source_operation,created_at";
