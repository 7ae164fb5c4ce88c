//! Registry presence invariant
//!
//! For any sequence of register/unregister operations, an identity is online
//! iff its connection set is non-empty, every empty↔non-empty crossing emits
//! exactly one presence event, repeated unregisters change nothing, and no
//! connection is ever visible under two identities.

use proptest::prelude::*;
use std::collections::HashMap;
use wavecall_core::relay::registry::ConnectionRegistry;
use wavecall_core::{ConnectionId, PresenceEvent, UserId};

const IDENTITIES: usize = 4;
const CONNECTIONS: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Register { identity: usize, connection: usize },
    Unregister { connection: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDENTITIES, 0..CONNECTIONS).prop_map(|(identity, connection)| Op::Register {
            identity,
            connection
        }),
        (0..CONNECTIONS).prop_map(|connection| Op::Unregister { connection }),
    ]
}

fn identity(n: usize) -> UserId {
    UserId::new(format!("user-{n}"))
}

proptest! {
    #[test]
    fn presence_matches_connection_count(ops in proptest::collection::vec(op_strategy(), 0..64)) {
        let connections: Vec<ConnectionId> = (0..CONNECTIONS).map(|_| ConnectionId::new()).collect();
        let mut registry: ConnectionRegistry<UserId> = ConnectionRegistry::new();
        // Reference model: which identity owns each connection
        let mut model: HashMap<usize, usize> = HashMap::new();

        for op in ops {
            match op {
                Op::Register { identity: i, connection: c } => {
                    let i_online_before = model.values().any(|owner| *owner == i);
                    let events = registry.register(identity(i), connections[c]);
                    let old = model.insert(c, i);

                    let mut expected = Vec::new();
                    if let Some(o) = old {
                        if o != i && !model.values().any(|owner| *owner == o) {
                            expected.push(PresenceEvent {
                                identity: identity(o),
                                online: false,
                            });
                        }
                    }
                    if !i_online_before {
                        expected.push(PresenceEvent {
                            identity: identity(i),
                            online: true,
                        });
                    }
                    prop_assert_eq!(events, expected);
                }
                Op::Unregister { connection: c } => {
                    let result = registry.unregister(connections[c]);
                    let again = registry.unregister(connections[c]);
                    let old = model.remove(&c);

                    // Second unregister of the same connection is always a no-op
                    prop_assert!(again.is_none());
                    prop_assert_eq!(result.is_some(), old.is_some());
                    if let (Some(result), Some(o)) = (result, old) {
                        prop_assert_eq!(result.identity, identity(o));
                        let expected_offline = !model.values().any(|owner| *owner == o);
                        prop_assert_eq!(result.went_offline.is_some(), expected_offline);
                    }
                }
            }

            // Online iff the model holds at least one connection
            for i in 0..IDENTITIES {
                let expected = model.values().any(|owner| *owner == i);
                prop_assert_eq!(registry.is_online(&identity(i)), expected);
                prop_assert_eq!(
                    registry.connections_for(&identity(i)).len(),
                    model.values().filter(|owner| **owner == i).count()
                );
            }

            // A connection is registered under at most one identity
            for (c, owner) in &model {
                prop_assert_eq!(registry.identity_of(connections[*c]), Some(&identity(*owner)));
            }
        }
    }
}
