use std::sync::{Mutex, OnceLock};

use crate::test::Test;

/// Collects test and suite declarations.
///
/// Registration order is preserved and serves as declaration order when
/// the plan builder orders sibling steps. Typically populated once at
/// process startup through explicit registration calls, then consumed as
/// a whole by the plan builder.
#[derive(Debug, Default)]
pub struct TestRegistry {
    tests: Vec<Test>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a test or suite declaration.
    pub fn register(&mut self, test: Test) {
        self.tests.push(test);
    }

    /// All registered declarations, in registration order.
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// Consumes the registry, yielding the declarations.
    pub fn into_tests(self) -> Vec<Test> {
        self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// The process-wide registry, for explicit startup registration.
    pub fn global() -> &'static Mutex<TestRegistry> {
        static GLOBAL: OnceLock<Mutex<TestRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Mutex::new(TestRegistry::new()))
    }

    /// Registers into the process-wide registry.
    pub fn register_global(test: Test) {
        Self::global()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(test);
    }

    /// Snapshot of the process-wide registry's declarations.
    pub fn global_tests() -> Vec<Test> {
        Self::global()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .tests()
            .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{SourceLocation, TestId};

    fn declaration(name: &str) -> Test {
        Test::new(
            TestId::new([name]),
            SourceLocation::new("tests.rs", 1, 1),
            || async { Ok(()) },
        )
    }

    #[test]
    fn test_registration_preserves_order() {
        let mut registry = TestRegistry::new();
        registry.register(declaration("first"));
        registry.register(declaration("second"));
        registry.register(declaration("third"));

        let names: Vec<&str> = registry
            .tests()
            .iter()
            .map(|t| t.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_global_registry_accumulates() {
        let before = TestRegistry::global_tests().len();
        TestRegistry::register_global(declaration("global"));
        assert_eq!(TestRegistry::global_tests().len(), before + 1);
    }
}
