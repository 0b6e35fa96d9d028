//! Partitions recipients by their preferred delivery cadence.

use crate::models::{Interval, Recipient};
use crate::settings::PreferenceResolver;

/// Recipients of one event, bucketed by interval.
///
/// Relative order within each bucket follows the input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub instant: Vec<Recipient>,
    pub daily: Vec<Recipient>,
    pub weekly: Vec<Recipient>,
}

impl Split {
    pub fn is_empty(&self) -> bool {
        self.instant.is_empty() && self.daily.is_empty() && self.weekly.is_empty()
    }

    pub fn bucket(&self, interval: Interval) -> &[Recipient] {
        match interval {
            Interval::Instant => &self.instant,
            Interval::Daily => &self.daily,
            Interval::Weekly => &self.weekly,
        }
    }

    fn push(&mut self, interval: Interval, recipient: Recipient) {
        match interval {
            Interval::Instant => self.instant.push(recipient),
            Interval::Daily => self.daily.push(recipient),
            Interval::Weekly => self.weekly.push(recipient),
        }
    }
}

/// Single pass over `recipients`, one interval lookup each.
///
/// Unrecognized or unresolvable intervals land in `instant`.
pub async fn split(resolver: &PreferenceResolver, recipients: Vec<Recipient>) -> Split {
    let mut split = Split::default();
    for recipient in recipients {
        let raw = resolver.resolve_interval(&recipient.opaque_id).await;
        split.push(Interval::parse_or_instant(&raw), recipient);
    }
    split
}
