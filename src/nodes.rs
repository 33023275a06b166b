use k8s_openapi::api::core::v1::Node;

const READY_CONDITION: &str = "Ready";
const INTERNAL_IP_ADDRESS: &str = "InternalIP";

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or("")
}

/// A node counts as unready unless its Ready condition is present with
/// status True; False, Unknown and a missing condition are all unready.
/// Other condition types are ignored.
pub fn is_unready(node: &Node) -> bool {
    let ready = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == READY_CONDITION && c.status == "True")
        })
        .unwrap_or(false);
    !ready
}

pub fn unready_nodes(nodes: &[Node]) -> Vec<&Node> {
    nodes.iter().filter(|n| is_unready(n)).collect()
}

/// The address the detector probes. Empty address strings are treated as
/// missing.
pub fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == INTERNAL_IP_ADDRESS && !a.address.is_empty())
        .map(|a| a.address.clone())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeCondition, NodeStatus};
    use kube::api::ObjectMeta;

    /// Node fixture with a Ready condition of the given status and an
    /// optional InternalIP address.
    pub fn node(name: &str, ready_status: &str, internal_ip: Option<&str>) -> Node {
        let addresses = internal_ip.map(|ip| {
            vec![NodeAddress {
                type_: "InternalIP".to_string(),
                address: ip.to_string(),
            }]
        });
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: ready_status.to_string(),
                    ..Default::default()
                }]),
                addresses,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::node;
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeCondition};

    #[test]
    fn ready_true_is_not_unready() {
        assert!(!is_unready(&node("a", "True", None)));
    }

    #[test]
    fn false_unknown_and_missing_are_unready() {
        assert!(is_unready(&node("a", "False", None)));
        assert!(is_unready(&node("a", "Unknown", None)));

        let mut no_conditions = node("a", "True", None);
        no_conditions.status.as_mut().unwrap().conditions = None;
        assert!(is_unready(&no_conditions));

        let mut no_status = node("a", "True", None);
        no_status.status = None;
        assert!(is_unready(&no_status));
    }

    #[test]
    fn other_conditions_are_ignored() {
        let mut n = node("a", "True", None);
        n.status
            .as_mut()
            .unwrap()
            .conditions
            .as_mut()
            .unwrap()
            .push(NodeCondition {
                type_: "MemoryPressure".to_string(),
                status: "True".to_string(),
                ..Default::default()
            });
        assert!(!is_unready(&n));
    }

    #[test]
    fn internal_ip_is_extracted() {
        assert_eq!(
            internal_ip(&node("a", "False", Some("10.0.0.3"))),
            Some("10.0.0.3".to_string())
        );
    }

    #[test]
    fn missing_or_empty_internal_ip_is_none() {
        assert_eq!(internal_ip(&node("a", "False", None)), None);
        assert_eq!(internal_ip(&node("a", "False", Some(""))), None);

        let mut external_only = node("a", "False", None);
        external_only.status.as_mut().unwrap().addresses = Some(vec![NodeAddress {
            type_: "ExternalIP".to_string(),
            address: "1.2.3.4".to_string(),
        }]);
        assert_eq!(internal_ip(&external_only), None);
    }

    #[test]
    fn unready_nodes_filters_by_readiness() {
        let all = vec![
            node("a", "True", None),
            node("b", "False", None),
            node("c", "Unknown", None),
        ];
        let unready: Vec<&str> = unready_nodes(&all).iter().map(|n| node_name(n)).collect();
        assert_eq!(unready, vec!["b", "c"]);
    }
}
