//! Constants used throughout the laboratory core crate.

/// Default directory for order and result storage when nothing is configured.
pub const DEFAULT_DATA_DIR: &str = "lims_data";

/// Directory name (under the data dir) holding one JSON file per order.
pub const ORDERS_DIR_NAME: &str = "orders";

/// Directory name (under the data dir) holding result records, one subdirectory per order.
pub const RESULTS_DIR_NAME: &str = "results";

/// Default laboratory name printed on the letterhead.
pub const DEFAULT_LAB_NAME: &str = "Laboratory Information System";

/// Referring party recorded when the patient was not referred by a doctor.
pub const SELF_REFERRED: &str = "Self";

/// Youngest age for which the creatinine filtration-rate equation applies.
pub const ADULT_AGE_YEARS: u32 = 18;

/// Text printed where a comment was not entered.
pub const NO_COMMENT: &str = "N/A";

/// Text printed where a derived value cannot be computed.
pub const NOT_COMPUTABLE: &str = "-";

/// Maximum length of an order reference code.
pub const MAX_REFERENCE_CODE_LEN: usize = 64;

/// Prefix of generated order reference codes.
pub const ORDER_REFERENCE_PREFIX: &str = "LAB";
