use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use ed25519_dalek::VerifyingKey;
use tvu_consensus::{networking::Network, turbine::shred::FecSetKey, types::vote::SignedVote};

/// A mock network stub which gossips votes between threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<SignedVote>>,
    inbox: Arc<Mutex<Receiver<SignedVote>>>,
    pub(crate) repairs: Arc<Mutex<Vec<FecSetKey>>>,
}

impl Network for NetworkStub {
    fn broadcast_vote(&mut self, vote: SignedVote) {
        for (peer, sender) in &self.all_peers {
            if *peer != self.my_verifying_key {
                let _ = sender.send(vote.clone());
            }
        }
    }

    fn request_repair(&mut self, key: FecSetKey) {
        self.repairs.lock().unwrap().push(key)
    }

    fn recv_vote(&mut self) -> Option<SignedVote> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(vote) => Some(vote),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<SignedVote>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            repairs: Arc::new(Mutex::new(Vec::new())),
        })
        .collect()
}
