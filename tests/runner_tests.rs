use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recon_harness::error::RunnerError;
use recon_harness::harness::Harness;
use recon_harness::replay::ReplayHarness;
use recon_harness::runner::{DiagnosticModule, Runner};
use recon_harness::types::{Category, CheckResult, CheckStatus};
use tokio_util::sync::CancellationToken;

enum Behavior {
    Pass(usize),
    Fail,
    Panic,
    Sleep(Duration),
    /// Cancels the suite token, then returns nothing.
    CancelSuite(CancellationToken),
}

struct Stub {
    name: &'static str,
    category: Category,
    behavior: Behavior,
}

impl Stub {
    fn new(name: &'static str, category: Category, behavior: Behavior) -> Arc<dyn DiagnosticModule> {
        Arc::new(Self { name, category, behavior })
    }
}

#[async_trait]
impl DiagnosticModule for Stub {
    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    fn requirement_tag(&self) -> &str {
        "T-1"
    }

    async fn run(&self, _cancel: CancellationToken, _harness: Arc<dyn Harness>) -> Vec<CheckResult> {
        match &self.behavior {
            Behavior::Pass(n) => (0..*n)
                .map(|i| CheckResult::pass(format!("{} #{i}", self.name), "T-1", self.category, Duration::ZERO, "ok"))
                .collect(),
            Behavior::Fail => vec![CheckResult::fail(self.name, "T-1", self.category, Duration::ZERO, "bad", "boom")],
            Behavior::Panic => panic!("stub exploded"),
            Behavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                vec![CheckResult::pass(self.name, "T-1", self.category, Duration::ZERO, "slept")]
            }
            Behavior::CancelSuite(token) => {
                token.cancel();
                Vec::new()
            }
        }
    }
}

fn runner() -> Runner {
    let harness: Arc<dyn Harness> = Arc::new(ReplayHarness::new());
    Runner::new(harness)
}

#[tokio::test]
async fn panicking_module_is_contained() {
    let mut r = runner();
    r.register(Stub::new("a", Category::Sdk, Behavior::Pass(2)));
    r.register(Stub::new("crash", Category::Sdk, Behavior::Panic));
    r.register(Stub::new("c", Category::Framework, Behavior::Pass(1)));

    let suite = r.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(suite.total_tests(), 4);
    let crash = &suite.results[2];
    assert_eq!(crash.name(), "crash");
    assert_eq!(crash.status(), CheckStatus::Error);
    assert!(crash.error_text().unwrap().contains("stub exploded"));
    assert_eq!(suite.overall_status, CheckStatus::Error);
    assert_eq!(suite.results[3].name(), "c");
}

#[tokio::test]
async fn results_follow_registration_order() {
    let mut r = runner();
    r.register(Stub::new("first", Category::Framework, Behavior::Pass(1)));
    r.register(Stub::new("second", Category::Sdk, Behavior::Fail));
    r.register(Stub::new("third", Category::Sdk, Behavior::Pass(1)));

    let suite = r.run(&CancellationToken::new()).await.unwrap();
    let names: Vec<_> = suite.results.iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["first #0", "second", "third #0"]);
    assert_eq!(suite.overall_status, CheckStatus::Fail);
    assert_eq!(suite.sdk_summary.total, 2);
    assert_eq!(suite.framework_summary.passed, 1);
}

#[tokio::test]
async fn slow_module_times_out_when_run_alone() {
    let mut r = runner().with_timeouts(Duration::from_secs(10), Duration::from_millis(50));
    r.register(Stub::new("slow", Category::Sdk, Behavior::Sleep(Duration::from_secs(5))));

    let results = r.run_single("slow", &CancellationToken::new()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status(), CheckStatus::Error);
    assert!(results[0].message().contains("timed out"));
}

#[tokio::test]
async fn suite_runs_ignore_the_module_timeout() {
    let mut r = runner().with_timeouts(Duration::from_secs(10), Duration::from_millis(50));
    r.register(Stub::new("unhurried", Category::Sdk, Behavior::Sleep(Duration::from_millis(200))));
    r.register(Stub::new("fast", Category::Sdk, Behavior::Pass(1)));

    let suite = r.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(suite.total_tests(), 2);
    assert_eq!(suite.results[0].status(), CheckStatus::Pass);
    assert_eq!(suite.results[0].message(), "slept");
    assert!(!suite.interrupted);

    let sdk = r.run_category(Category::Sdk, &CancellationToken::new()).await.unwrap();
    assert_eq!(sdk.results[0].status(), CheckStatus::Pass);
}

#[tokio::test]
async fn category_run_filters_modules() {
    let mut r = runner();
    r.register(Stub::new("sdk", Category::Sdk, Behavior::Pass(1)));
    r.register(Stub::new("fw", Category::Framework, Behavior::Pass(3)));

    let suite = r.run_category(Category::Framework, &CancellationToken::new()).await.unwrap();
    assert_eq!(suite.mode, "framework");
    assert_eq!(suite.total_tests(), 3);
    assert_eq!(suite.sdk_summary.total, 0);
}

#[tokio::test]
async fn run_single_is_repeatable() {
    let mut r = runner();
    r.register(Stub::new("only", Category::Sdk, Behavior::Pass(2)));
    let cancel = CancellationToken::new();

    let first = r.run_single("only", &cancel).await.unwrap();
    let second = r.run_single("only", &cancel).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_eq!(first[0].name(), second[0].name());
    assert_eq!(first[0].status(), second[0].status());
}

#[tokio::test]
async fn duplicate_names_all_run_in_a_suite() {
    let mut r = runner();
    r.register(Stub::new("dup", Category::Sdk, Behavior::Pass(1)));
    r.register(Stub::new("dup", Category::Sdk, Behavior::Pass(2)));

    let suite = r.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(suite.total_tests(), 3);
    assert_eq!(r.modules().len(), 2);
}

#[tokio::test]
async fn run_single_picks_the_first_registration() {
    let mut r = runner();
    r.register(Stub::new("dup", Category::Sdk, Behavior::Pass(1)));
    r.register(Stub::new("dup", Category::Framework, Behavior::Pass(2)));

    let results = r.run_single("dup", &CancellationToken::new()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].category(), Category::Sdk);
}

#[tokio::test]
async fn unknown_module_is_reported() {
    let r = runner();
    assert_eq!(
        r.run_single("nope", &CancellationToken::new()).await.unwrap_err(),
        RunnerError::ModuleNotFound("nope".into())
    );
}

#[tokio::test]
async fn cancelled_before_start_yields_no_suite() {
    let mut r = runner();
    r.register(Stub::new("a", Category::Sdk, Behavior::Pass(1)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(r.run(&cancel).await.unwrap_err(), RunnerError::Cancelled);
}

#[tokio::test]
async fn suite_deadline_keeps_partial_results() {
    let mut r = runner().with_timeouts(Duration::from_millis(100), Duration::from_secs(10));
    r.register(Stub::new("quick", Category::Sdk, Behavior::Pass(1)));
    r.register(Stub::new("slow", Category::Sdk, Behavior::Sleep(Duration::from_secs(5))));
    r.register(Stub::new("never", Category::Sdk, Behavior::Pass(1)));

    let suite = r.run(&CancellationToken::new()).await.unwrap();
    assert!(suite.interrupted);
    assert_eq!(suite.total_tests(), 2);
    assert_eq!(suite.results[1].status(), CheckStatus::Error);
}

#[tokio::test]
async fn cancellation_after_a_silent_module_keeps_the_suite() {
    let cancel = CancellationToken::new();
    let mut r = runner();
    r.register(Stub::new("quiet", Category::Sdk, Behavior::CancelSuite(cancel.clone())));
    r.register(Stub::new("never", Category::Sdk, Behavior::Pass(1)));

    let suite = r.run(&cancel).await.unwrap();
    assert!(suite.interrupted);
    assert_eq!(suite.total_tests(), 0);
}
