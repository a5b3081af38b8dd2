//! Link/joint tree validation

use std::collections::{HashMap, HashSet};

use crate::model::{Joint, Link};

use super::ParseError;

/// Check that links and joints form a single tree and return its root link
///
/// An empty link list is accepted and yields an empty root name.
pub fn find_root(links: &[Link], joints: &[Joint]) -> Result<String, ParseError> {
    let mut link_names = HashSet::new();
    for link in links {
        if !link_names.insert(link.name.as_str()) {
            return Err(ParseError::Topology(format!("duplicate link '{}'", link.name)));
        }
    }

    let mut joint_names = HashSet::new();
    let mut parent_of: HashMap<&str, &str> = HashMap::new();
    for joint in joints {
        if !joint_names.insert(joint.name.as_str()) {
            return Err(ParseError::Topology(format!("duplicate joint '{}'", joint.name)));
        }
        for link in [&joint.parent, &joint.child] {
            if !link_names.contains(link.as_str()) {
                return Err(ParseError::Topology(format!(
                    "joint '{}' references unknown link '{}'",
                    joint.name, link
                )));
            }
        }
        if parent_of.insert(&joint.child, &joint.parent).is_some() {
            return Err(ParseError::Topology(format!(
                "link '{}' has more than one parent joint",
                joint.child
            )));
        }
    }

    if links.is_empty() {
        return Ok(String::new());
    }

    let roots: Vec<&str> = links
        .iter()
        .map(|l| l.name.as_str())
        .filter(|name| !parent_of.contains_key(name))
        .collect();
    let root = match roots.as_slice() {
        [root] => *root,
        [] => return Err(ParseError::Topology("no root link (cycle)".to_string())),
        _ => {
            return Err(ParseError::Topology(format!(
                "multiple root links: {}",
                roots.join(", ")
            )));
        }
    };

    // With one root and one parent per link, an unreachable link sits on a cycle
    let mut reached: HashSet<&str> = HashSet::from([root]);
    let mut stack = vec![root];
    while let Some(link) = stack.pop() {
        for joint in joints.iter().filter(|j| j.parent == link) {
            if reached.insert(&joint.child) {
                stack.push(&joint.child);
            }
        }
    }
    if let Some(orphan) = links.iter().find(|l| !reached.contains(l.name.as_str())) {
        return Err(ParseError::Topology(format!(
            "link '{}' is part of a cycle",
            orphan.name
        )));
    }

    Ok(root.to_string())
}
