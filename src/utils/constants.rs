pub static STABILIZE_SLEEP_MILLIS: u64 = 1_000;
pub static FIX_FINGERS_SLEEP_MILLIS: u64 = 3_000;
pub static CHECK_PREDECESSOR_SLEEP_MILLIS: u64 = 1_000;

pub static CONNECTION_RETRY_UPON_FAILURE_MILLIS: u64 = 100;
pub static RPC_TIMEOUT_MILLIS: u64 = 500;

pub static DEFAULT_HASH_BIT_LENGTH: u8 = 32;

pub static DEBUG_RPCS_UNAVAILABLE_ERROR_MESSAGE: &str =
    "Debug RPCs are only available on nodes running with the debug flag";
