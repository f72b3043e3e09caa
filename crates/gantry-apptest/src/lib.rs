//! Gantry application validation
//!
//! Runs six independent checks against an application directory (build,
//! static analysis, unit tests, API smoke test, security scan and footprint
//! metrics) and aggregates them into a [`ValidationReport`].

pub mod checks;
pub mod error;
pub mod report;
pub mod target;
pub mod tester;

pub use checks::{
    count_lines_of_code, default_checks, parse_coverage, ApiCheck, BuildCheck, Check,
    CheckContext, PerformanceCheck, ProbeResult, SecurityCheck, StaticAnalysisCheck,
    UnitTestCheck, DEFAULT_PROBE_PATHS,
};
pub use error::ValidationError;
pub use report::{CheckCategory, CheckOutcome, CheckStatus, OverallStatus, ValidationReport};
pub use target::{AppTarget, Endpoint, Entity, Field};
pub use tester::ApplicationTester;
