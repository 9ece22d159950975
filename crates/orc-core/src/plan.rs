// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plans: ordered step lists and L3 plan trees.
//!
//! Step ids are positional and dotted (`"1"`, `"2.3"`): unique and
//! total-order-compatible with execution order by construction.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single executable step with its position in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// Positional id (`"1"`, `"2.3"`).
    pub id: String,
    /// Imperative instruction text.
    pub step: String,
    /// Ancestor step texts, outermost first (empty for flat plans).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<String>,
}

/// An ordered, finite plan. Execution walks `steps` front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Leaf steps in execution order.
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Build a flat plan from bare step strings, assigning ids `"1"..`.
    pub fn from_steps<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| PlanStep {
                id: (i + 1).to_string(),
                step: s.into(),
                ancestors: Vec::new(),
            })
            .collect();
        Self { steps }
    }

    /// `true` when the plan has no executable steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of executable steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// A node in an L3 plan tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanNode {
    /// Positional dotted id.
    pub id: String,
    /// Instruction text for this node.
    pub step: String,
    /// Sub-steps; leaves have none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Build a tree from nested step texts, assigning positional ids.
    pub fn tree_from(steps: &[(String, Vec<String>)]) -> Vec<PlanNode> {
        steps
            .iter()
            .enumerate()
            .map(|(i, (step, subs))| {
                let id = (i + 1).to_string();
                let children = subs
                    .iter()
                    .enumerate()
                    .map(|(j, s)| PlanNode {
                        id: format!("{id}.{}", j + 1),
                        step: s.clone(),
                        children: Vec::new(),
                    })
                    .collect();
                PlanNode {
                    id,
                    step: step.clone(),
                    children,
                }
            })
            .collect()
    }
}

/// Flatten a plan tree into leaf execution order, recording each leaf's
/// ancestor path.
pub fn flatten_tree(nodes: &[PlanNode]) -> Plan {
    let mut steps = Vec::new();
    for node in nodes {
        flatten_into(node, &mut Vec::new(), &mut steps);
    }
    Plan { steps }
}

fn flatten_into(node: &PlanNode, ancestors: &mut Vec<String>, out: &mut Vec<PlanStep>) {
    if node.children.is_empty() {
        out.push(PlanStep {
            id: node.id.clone(),
            step: node.step.clone(),
            ancestors: ancestors.clone(),
        });
        return;
    }
    ancestors.push(node.step.clone());
    for child in &node.children {
        flatten_into(child, ancestors, out);
    }
    ancestors.pop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_plan_assigns_positional_ids() {
        let plan = Plan::from_steps(["a", "b", "c"]);
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn tree_flattens_in_execution_order() {
        let tree = PlanNode::tree_from(&[
            ("setup".into(), vec![]),
            (
                "refactor".into(),
                vec!["extract helper".into(), "update callers".into()],
            ),
        ]);
        let plan = flatten_tree(&tree);
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["1", "2.1", "2.2"]);
        assert_eq!(plan.steps[1].ancestors, vec!["refactor".to_string()]);
        assert!(plan.steps[0].ancestors.is_empty());
    }

    #[test]
    fn flattened_ids_are_unique_and_sorted_like_execution() {
        let tree = PlanNode::tree_from(&[
            ("a".into(), vec!["a1".into(), "a2".into()]),
            ("b".into(), vec![]),
        ]);
        let plan = flatten_tree(&tree);
        let mut ids: Vec<String> = plan.steps.iter().map(|s| s.id.clone()).collect();
        let original = ids.clone();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), original.len(), "ids must be unique");
    }

    #[test]
    fn plan_json_roundtrip() {
        let plan = Plan::from_steps(["only step"]);
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
