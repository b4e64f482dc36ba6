use thiserror::Error;

use crate::error::BoxError;

/// Aggregate failure of a before-checkpoint sweep.
///
/// Every failing resource contributes one entry to `suppressed`, in the order
/// the resources were notified.
#[derive(Debug, Default, Error)]
#[error("{} resource(s) failed before checkpoint", .suppressed.len())]
pub struct CheckpointError {
    suppressed: Vec<BoxError>,
}

/// Aggregate failure of an after-restore sweep.
#[derive(Debug, Default, Error)]
#[error("{} resource(s) failed after restore", .suppressed.len())]
pub struct RestoreError {
    suppressed: Vec<BoxError>,
}

macro_rules! aggregate_impl {
    ($name:ident) => {
        impl $name {
            /// Creates an aggregate from individual failures.
            pub fn new(suppressed: Vec<BoxError>) -> Self {
                Self { suppressed }
            }

            /// Returns the individual failures.
            pub fn suppressed(&self) -> &[BoxError] {
                &self.suppressed
            }

            /// Consumes the aggregate and returns the individual failures.
            pub fn into_suppressed(self) -> Vec<BoxError> {
                self.suppressed
            }

            /// Returns true if no failure was recorded.
            pub fn is_empty(&self) -> bool {
                self.suppressed.is_empty()
            }

            /// Records a failure. An aggregate of the same kind is flattened
            /// into its individual failures.
            pub(crate) fn absorb(&mut self, error: BoxError) {
                match error.downcast::<$name>() {
                    Ok(nested) => self.suppressed.extend(nested.suppressed),
                    Err(other) => self.suppressed.push(other),
                }
            }

            pub(crate) fn into_result(self) -> Result<(), Self> {
                if self.is_empty() {
                    Ok(())
                } else {
                    Err(self)
                }
            }
        }
    };
}

aggregate_impl!(CheckpointError);
aggregate_impl!(RestoreError);
