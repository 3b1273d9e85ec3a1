//! Priority ordering for startup sequencing.

use modhost_api::TypeDescriptor;
use std::cmp::Reverse;
use std::sync::Arc;

/// Anything carrying a declared priority.
pub trait Prioritized {
    fn priority(&self) -> i32;
}

impl Prioritized for TypeDescriptor {
    fn priority(&self) -> i32 {
        TypeDescriptor::priority(self)
    }
}

impl<T: Prioritized + ?Sized> Prioritized for Arc<T> {
    fn priority(&self) -> i32 {
        (**self).priority()
    }
}

/// Sorts by descending priority. Equal priorities keep their input order.
pub fn order_by_priority<T: Prioritized + Clone>(items: &[T]) -> Vec<T> {
    let mut ordered = items.to_vec();
    // sort_by_key is stable
    ordered.sort_by_key(|item| Reverse(item.priority()));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, priority: i32) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor::new(name).with_priority(priority))
    }

    fn names(items: &[Arc<TypeDescriptor>]) -> Vec<&str> {
        items.iter().map(|t| t.name()).collect()
    }

    #[test]
    fn test_descending_and_stable_on_ties() {
        let input = vec![
            named("ten", 10),
            named("five_first", 5),
            named("five_second", 5),
            named("twenty", 20),
        ];
        let ordered = order_by_priority(&input);
        assert_eq!(
            names(&ordered),
            ["twenty", "ten", "five_first", "five_second"]
        );
    }

    #[test]
    fn test_discovery_order_reversed_by_priority() {
        let input = vec![named("B", 5), named("A", 10)];
        assert_eq!(names(&order_by_priority(&input)), ["A", "B"]);
    }

    #[test]
    fn test_negative_and_default_priorities() {
        let input = vec![
            named("low", -3),
            Arc::new(TypeDescriptor::new("neutral")),
            named("high", 1),
        ];
        assert_eq!(names(&order_by_priority(&input)), ["high", "neutral", "low"]);
    }

    #[test]
    fn test_empty_input() {
        let input: Vec<Arc<TypeDescriptor>> = Vec::new();
        assert!(order_by_priority(&input).is_empty());
    }
}
