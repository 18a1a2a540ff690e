//! Fixed test identifiers for deterministic tests
//!
//! Shapes follow App Store Connect values so tests read like production data.

// App Store Connect credentials
pub const TEST_ISSUER_ID: &str = "57246542-96fe-1a63-e053-0824d011072a";
pub const TEST_KEY_ID: &str = "2X9R4HXF34";
pub const TEST_KEY_ID_ROTATED: &str = "7Q3K8ZLM21";

// Apps
pub const TEST_BUNDLE_ID: &str = "com.example.storekit";
pub const TEST_OTHER_BUNDLE_ID: &str = "com.example.other";

// Transactions
pub const TEST_TRANSACTION_ID_1: &str = "2000000000000001";
pub const TEST_TRANSACTION_ID_2: &str = "2000000000000002";
pub const TEST_ORIGINAL_TRANSACTION_ID: &str = "2000000000000000";

// Products
pub const TEST_PRODUCT_ID: &str = "com.example.storekit.premium.monthly";
