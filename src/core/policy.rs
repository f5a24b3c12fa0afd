use crate::BatchError;

/// Decides whether a failed item may be skipped.
///
/// `skip_count` is the number of items already skipped in the current step
/// execution, reads and processing combined.
pub trait SkipPolicy {
    fn should_skip(&self, error: &BatchError, skip_count: usize) -> bool;
}

/// Skips classified errors until `skip_limit` items have been skipped.
///
/// The default classifier is [`BatchError::is_skippable`]: reader and
/// processor errors are skippable, everything else is fatal.
pub struct LimitCheckingSkipPolicy {
    skip_limit: usize,
    classifier: fn(&BatchError) -> bool,
}

impl LimitCheckingSkipPolicy {
    pub fn new(skip_limit: usize) -> Self {
        Self {
            skip_limit,
            classifier: BatchError::is_skippable,
        }
    }

    /// Replaces the error classifier.
    pub fn with_classifier(mut self, classifier: fn(&BatchError) -> bool) -> Self {
        self.classifier = classifier;
        self
    }
}

impl SkipPolicy for LimitCheckingSkipPolicy {
    fn should_skip(&self, error: &BatchError, skip_count: usize) -> bool {
        (self.classifier)(error) && skip_count < self.skip_limit
    }
}

/// Every failure is fatal.
#[derive(Default)]
pub struct NeverSkipItemSkipPolicy;

impl SkipPolicy for NeverSkipItemSkipPolicy {
    fn should_skip(&self, _error: &BatchError, _skip_count: usize) -> bool {
        false
    }
}

/// Every item-level failure is skipped, without limit.
#[derive(Default)]
pub struct AlwaysSkipItemSkipPolicy;

impl SkipPolicy for AlwaysSkipItemSkipPolicy {
    fn should_skip(&self, error: &BatchError, _skip_count: usize) -> bool {
        error.is_skippable()
    }
}
