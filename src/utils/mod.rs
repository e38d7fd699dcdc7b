///! Some utility functions

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use minidom::Element;

use crate::CalendarCollection;

pub mod comparison;

/// Walks an XML tree and returns every element that has the given name
pub fn find_elems<S: AsRef<str>>(root: &Element, searched_name: S) -> Vec<&Element> {
    let searched_name = searched_name.as_ref();
    let mut elems: Vec<&Element> = Vec::new();

    for el in root.children() {
        if el.name() == searched_name {
            elems.push(el);
        } else {
            let ret = find_elems(el, searched_name);
            elems.extend(ret);
        }
    }
    elems
}

/// Walks an XML tree until it finds an elements with the given name
pub fn find_elem<S: AsRef<str>>(root: &Element, searched_name: S) -> Option<&Element> {
    let searched_name = searched_name.as_ref();
    if root.name() == searched_name {
        return Some(root);
    }

    for el in root.children() {
        if el.name() == searched_name {
            return Some(el);
        } else {
            let ret = find_elem(el, searched_name);
            if ret.is_some() {
                return ret;
            }
        }
    }
    None
}


/// A debug utility that pretty-prints a collection
pub fn print_collection(collection: &CalendarCollection) {
    println!("COLLECTION {} (token {:?})", collection.url(), collection.sync_token().map(|t| t.as_str()));
    let mut objects: Vec<_> = collection.all_objects().collect();
    objects.sort_by(comparison::compare_objects_by_url);
    for obj in objects {
        let status = if obj.is_deleted() { "x" } else { "=" };
        println!("    {} {}\t{}", status, obj.uid().unwrap_or("<no UID>"), obj.url());
    }
}


/// Compare keys of two hashmaps for equality
pub fn keys_are_the_same<T, U, V>(left: &HashMap<T, U>, right: &HashMap<T, V>) -> bool
where
    T: Hash + Eq + Clone + std::fmt::Display,
{
    if left.len() != right.len() {
        log::debug!("Count of keys mismatch: {} and {}", left.len(), right.len());
        return false;
    }

    let keys_l: HashSet<T> = left.keys().cloned().collect();
    let keys_r: HashSet<T> = right.keys().cloned().collect();
    let result = keys_l == keys_r;
    if result == false {
        log::debug!("Keys of a map mismatch");
        for key in keys_l {
            log::debug!("   left: {}", key);
        }
        log::debug!("RIGHT:");
        for key in keys_r {
            log::debug!("  right: {}", key);
        }
    }
    result
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_elems() {
        let root: Element = r#"<d:multistatus xmlns:d="DAV:"><d:response><d:href>/a</d:href></d:response><d:response><d:href>/b</d:href></d:response></d:multistatus>"#
            .parse().unwrap();
        let hrefs: Vec<String> = find_elems(&root, "href").iter().map(|e| e.text()).collect();
        assert_eq!(hrefs, vec!["/a", "/b"]);
        assert_eq!(find_elem(&root, "href").map(|e| e.text()), Some("/a".to_string()));
        assert!(find_elem(&root, "sync-token").is_none());
    }

    #[test]
    fn test_keys_are_the_same() {
        let left: HashMap<String, u32> = vec![("a".to_string(), 1), ("b".to_string(), 2)].into_iter().collect();
        let right: HashMap<String, &str> = vec![("b".to_string(), "x"), ("a".to_string(), "y")].into_iter().collect();
        assert!(keys_are_the_same(&left, &right));

        let other: HashMap<String, &str> = vec![("a".to_string(), "y"), ("c".to_string(), "z")].into_iter().collect();
        assert!(keys_are_the_same(&left, &other) == false);
    }
}
