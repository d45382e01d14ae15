//! Attack detection — stateless pattern classifiers and the store-backed
//! sliding-window detector.

pub mod injection;
pub mod window;

pub use injection::{
    Detection, detect_all_injections, detect_command_injection, detect_ldap_injection,
    detect_nosql_injection, detect_sql_injection, detect_template_injection, detect_xpath_injection,
    detect_xss, scan_body,
};
pub use window::{ATTEMPT_LOGIN, AttemptOutcome, WindowDetector};
