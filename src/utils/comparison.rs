//! Utilities to compare custom types
//!
//! These can be used to sort results, e.g. the output of [`CalendarCollection::objects`](crate::CalendarCollection::objects)

use crate::object::CalendarObject;

/// Compare objects by URL
pub fn compare_objects_by_url(left: &&CalendarObject, right: &&CalendarObject) -> std::cmp::Ordering {
    Ord::cmp(left.url(), right.url())
}

