//! Property-based test generators using proptest.
//!
//! Provides strategies for generating nesting plans: chains of scopes,
//! each joining or isolating from its parent, writing some records and
//! optionally saving before it is disposed.

use proptest::prelude::*;
use unitscope_core::JoinOption;

/// One scope of a [`ScopePlan`], in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeStep {
    /// How the scope relates to the one created before it.
    pub join_option: JoinOption,
    /// Records this scope adds through its `MemorySession`.
    pub writes: usize,
    /// Whether `save` is called before the scope is disposed.
    pub save: bool,
}

impl ScopeStep {
    /// Whether this step starts a registry of its own.
    pub fn starts_registry(&self, index: usize) -> bool {
        index == 0 || self.join_option == JoinOption::ForceCreateNew
    }
}

/// A chain of nested scopes. Step `i + 1` is created while step `i` is
/// ambient; disposal runs innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePlan {
    /// Steps, outermost first.
    pub steps: Vec<ScopeStep>,
}

impl ScopePlan {
    /// Index of the step whose registry each step uses.
    pub fn registry_roots(&self) -> Vec<usize> {
        let mut roots = Vec::with_capacity(self.steps.len());
        let mut root = 0;
        for (index, step) in self.steps.iter().enumerate() {
            if step.starts_registry(index) {
                root = index;
            }
            roots.push(root);
        }
        roots
    }

    /// Number of distinct registries the plan creates.
    pub fn registry_count(&self) -> usize {
        self.steps
            .iter()
            .enumerate()
            .filter(|(index, step)| step.starts_registry(*index))
            .count()
    }

    /// Records written by the steps sharing the registry rooted at `root`.
    pub fn writes_in_registry(&self, root: usize) -> usize {
        self.registry_roots()
            .iter()
            .zip(&self.steps)
            .filter(|(r, _)| **r == root)
            .map(|(_, step)| step.writes)
            .sum()
    }

    /// Records that end up in the store: only registries whose root step
    /// saved are committed.
    pub fn expected_rows(&self) -> usize {
        self.steps
            .iter()
            .enumerate()
            .filter(|(index, step)| step.starts_registry(*index) && step.save)
            .map(|(index, _)| self.writes_in_registry(index))
            .sum()
    }

    /// Value `save` returns for step `index`: joined steps commit nothing,
    /// root steps commit every record written in their registry, since they
    /// save after all steps nested in them are disposed.
    pub fn expected_save_count(&self, index: usize) -> usize {
        if self.steps[index].starts_registry(index) {
            self.writes_in_registry(index)
        } else {
            0
        }
    }
}

/// Strategy for a single step.
pub fn scope_step_strategy() -> impl Strategy<Value = ScopeStep> {
    (
        prop_oneof![
            3 => Just(JoinOption::JoinExisting),
            1 => Just(JoinOption::ForceCreateNew),
        ],
        0usize..4,
        any::<bool>(),
    )
        .prop_map(|(join_option, writes, save)| ScopeStep {
            join_option,
            writes,
            save,
        })
}

/// Strategy for nesting plans of 1 to `max_depth` scopes.
pub fn scope_plan_strategy(max_depth: usize) -> impl Strategy<Value = ScopePlan> {
    prop::collection::vec(scope_step_strategy(), 1..=max_depth.max(1))
        .prop_map(|steps| ScopePlan { steps })
}

/// How much work a property test run does.
#[derive(Debug, Clone)]
pub struct PropertyBudget {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
    /// Deepest scope chain a generated plan may contain.
    pub max_depth: usize,
}

impl Default for PropertyBudget {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 500,
            max_depth: 6,
        }
    }
}

impl PropertyBudget {
    /// A budget for quick runs.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
            max_depth: 4,
        }
    }

    /// A budget for thorough runs.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 5000,
            max_depth: 10,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
