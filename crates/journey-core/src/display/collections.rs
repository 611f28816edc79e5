//! Collection wrapper types for displaying groups of domain objects.
//!
//! Each wrapper prints its items one after another using the item's own
//! `Display`, or a "No ... found." line when empty.

use std::{fmt, ops::Index};

use crate::{
    engine::TriggerMatch,
    models::{Activity, Contact, Enrollment, Journey, JourneyStep},
};

macro_rules! collection {
    ($(#[$meta:meta])* $name:ident, $item:ty, $empty:literal) => {
        $(#[$meta])*
        pub struct $name(pub Vec<$item>);

        impl $name {
            /// Check if the collection is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Get the number of items in the collection.
            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// Get a reference to the item at the given index.
            pub fn get(&self, index: usize) -> Option<&$item> {
                self.0.get(index)
            }

            /// Get an iterator over the items.
            pub fn iter(&self) -> std::slice::Iter<'_, $item> {
                self.0.iter()
            }
        }

        impl Index<usize> for $name {
            type Output = $item;

            fn index(&self, index: usize) -> &Self::Output {
                &self.0[index]
            }
        }

        impl IntoIterator for $name {
            type Item = $item;
            type IntoIter = std::vec::IntoIter<Self::Item>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }

        impl<'a> IntoIterator for &'a $name {
            type Item = &'a $item;
            type IntoIter = std::slice::Iter<'a, $item>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.0.is_empty() {
                    writeln!(f, $empty)
                } else {
                    for item in &self.0 {
                        write!(f, "{item}")?;
                    }
                    Ok(())
                }
            }
        }
    };
}

collection!(
    /// Journeys as compact summaries.
    ///
    /// Items are printed through [`JourneySummaryItem`], so steps are not
    /// listed.
    Journeys,
    JourneySummaryItem,
    "No journeys found."
);

collection!(
    /// Steps of one journey, in position order.
    Steps,
    JourneyStep,
    "No steps found."
);

collection!(Enrollments, EnrollmentSummaryItem, "No enrollments found.");

collection!(Contacts, Contact, "No contacts found.");

collection!(Activities, Activity, "No activities found.");

collection!(
    /// Per-journey outcomes of a trigger check.
    TriggerMatches,
    TriggerMatch,
    "No journeys matched the trigger."
);

/// Journey printed as a one-paragraph summary.
pub struct JourneySummaryItem(pub Journey);

impl From<Journey> for JourneySummaryItem {
    fn from(journey: Journey) -> Self {
        Self(journey)
    }
}

impl fmt::Display for JourneySummaryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::models::fmt_journey_summary(&self.0, f)
    }
}

/// Enrollment printed without its execution history.
pub struct EnrollmentSummaryItem(pub Enrollment);

impl From<Enrollment> for EnrollmentSummaryItem {
    fn from(enrollment: Enrollment) -> Self {
        Self(enrollment)
    }
}

impl fmt::Display for EnrollmentSummaryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::models::fmt_enrollment_summary(&self.0, f)
    }
}

impl From<Vec<Journey>> for Journeys {
    fn from(journeys: Vec<Journey>) -> Self {
        Self(journeys.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Enrollment>> for Enrollments {
    fn from(enrollments: Vec<Enrollment>) -> Self {
        Self(enrollments.into_iter().map(Into::into).collect())
    }
}
