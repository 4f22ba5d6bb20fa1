//! Pluggable failure policies and the filter classifier.
//!
//! When a filter decides a packet must be rejected, the classifier asks
//! the configured policies whether the rejection should have
//! consequences: banning the peer at the protocol level, or banning the
//! transport address at the host level. The answers become
//! filter-request actions that travel back up the pipe.

use std::rc::Rc;

use strand_proto::{Packet, PeerId};

use crate::action::{Action, Actions};

/// Decides whether a peer should be filtered after a failure.
pub trait PeerPolicy {
    /// Whether `peer` should be filtered; `ingress` distinguishes the
    /// sender (true) from the recipient (false) role.
    fn should_filter(&self, peer: &PeerId, ingress: bool) -> bool;
}

/// Decides whether a transport address should be filtered after a
/// failure.
pub trait TransportPolicy<A> {
    /// Whether `address` should be filtered; `ingress` distinguishes
    /// the source (true) from the destination (false) role.
    fn should_filter(&self, address: &A, ingress: bool) -> bool;
}

/// Peer policy that never filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPeerPolicy;

impl PeerPolicy for NullPeerPolicy {
    fn should_filter(&self, _peer: &PeerId, _ingress: bool) -> bool {
        false
    }
}

/// Transport policy that never filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransportPolicy;

impl<A> TransportPolicy<A> for NullTransportPolicy {
    fn should_filter(&self, _address: &A, _ingress: bool) -> bool {
        false
    }
}

/// Shared helper turning a rejected packet into filter-request actions.
///
/// Consulted by the validation and channel-assignment filters; produces
/// zero to four actions covering the sender/recipient peers and the
/// source/destination addresses.
pub struct Classifier<A, P, T> {
    peer_policy: Option<Rc<P>>,
    transport_policy: Option<Rc<T>>,
    _address: std::marker::PhantomData<A>,
}

impl<A, P, T> Classifier<A, P, T>
where
    A: Clone,
    P: PeerPolicy,
    T: TransportPolicy<A>,
{
    /// Build a classifier over optional policies.
    pub fn new(peer_policy: Option<Rc<P>>, transport_policy: Option<Rc<T>>) -> Self {
        Self { peer_policy, transport_policy, _address: std::marker::PhantomData }
    }

    /// Classify a rejected packet into filter-request actions.
    pub fn process(&self, source: &A, destination: &A, packet: &Packet) -> Actions<A> {
        let mut actions = Vec::new();

        if let Some(policy) = &self.peer_policy {
            if policy.should_filter(&packet.sender(), true) {
                actions.push(Action::FilterPeer { peer: packet.sender(), ingress: true });
            }
            if policy.should_filter(&packet.recipient(), false) {
                actions.push(Action::FilterPeer { peer: packet.recipient(), ingress: false });
            }
        }

        if let Some(policy) = &self.transport_policy {
            if policy.should_filter(source, true) {
                actions.push(Action::FilterTransport { address: source.clone(), ingress: true });
            }
            if policy.should_filter(destination, false) {
                actions.push(Action::FilterTransport {
                    address: destination.clone(),
                    ingress: false,
                });
            }
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use strand_proto::ChannelId;

    use super::*;

    struct AlwaysFilterPeers;
    impl PeerPolicy for AlwaysFilterPeers {
        fn should_filter(&self, _peer: &PeerId, _ingress: bool) -> bool {
            true
        }
    }

    struct AlwaysFilterTransports;
    impl TransportPolicy<u8> for AlwaysFilterTransports {
        fn should_filter(&self, _address: &u8, _ingress: bool) -> bool {
            true
        }
    }

    fn packet() -> Packet {
        Packet::outgoing(128, &PeerId::random(), &PeerId::random(), ChannelId::DEFAULT, 0)
            .unwrap()
    }

    #[test]
    fn no_policies_produce_no_actions() {
        let classifier: Classifier<u8, NullPeerPolicy, NullTransportPolicy> =
            Classifier::new(None, None);
        assert!(classifier.process(&1, &2, &packet()).is_empty());
    }

    #[test]
    fn null_policies_produce_no_actions() {
        let classifier =
            Classifier::new(Some(Rc::new(NullPeerPolicy)), Some(Rc::new(NullTransportPolicy)));
        let actions: Actions<u8> = classifier.process(&1, &2, &packet());
        assert!(actions.is_empty());
    }

    #[test]
    fn eager_policies_cover_all_four_subjects() {
        let classifier = Classifier::new(
            Some(Rc::new(AlwaysFilterPeers)),
            Some(Rc::new(AlwaysFilterTransports)),
        );
        let packet = packet();
        let actions = classifier.process(&1u8, &2u8, &packet);
        assert_eq!(actions.len(), 4);
        assert!(actions.contains(&Action::FilterPeer { peer: packet.sender(), ingress: true }));
        assert!(
            actions.contains(&Action::FilterPeer { peer: packet.recipient(), ingress: false })
        );
        assert!(actions.contains(&Action::FilterTransport { address: 1, ingress: true }));
        assert!(actions.contains(&Action::FilterTransport { address: 2, ingress: false }));
    }
}
