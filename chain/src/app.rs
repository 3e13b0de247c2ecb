//! The thin application layer: polls derived from the chain.
//!
//! Nothing here owns state. Poll listings and tallies are recomputed by
//! scanning a chain snapshot; submissions just enqueue transactions on
//! the peer. The scenario runner drives the same two entry points from a
//! file.

use std::collections::HashMap;
use std::path::Path;

use uuid::Uuid;

use crate::node::Peer;
use crate::types::{Block, PollAction, TxData};

/// One poll as recorded by its create transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct PollInfo {
    pub poll_id: String,
    pub poll_name: String,
    pub options: Vec<String>,
}

fn poll_actions(chain: &[Block]) -> impl Iterator<Item = &PollAction> {
    chain
        .iter()
        .flat_map(|block| block.txns.iter())
        .filter_map(|txn| txn.data.action())
}

/// Every poll created on the chain, in chain order.
pub fn all_polls(chain: &[Block]) -> Vec<PollInfo> {
    poll_actions(chain)
        .filter_map(|action| match action {
            PollAction::CreatePoll {
                poll_id,
                poll_name,
                options,
            } => Some(PollInfo {
                poll_id: poll_id.clone(),
                poll_name: poll_name.clone(),
                options: options.clone(),
            }),
            PollAction::Vote { .. } => None,
        })
        .collect()
}

/// Finds a poll by its display name.
pub fn find_poll_by_name(chain: &[Block], poll_name: &str) -> Option<PollInfo> {
    all_polls(chain)
        .into_iter()
        .find(|poll| poll.poll_name == poll_name)
}

/// Finds a poll by its id.
pub fn find_poll_by_id(chain: &[Block], poll_id: &str) -> Option<PollInfo> {
    all_polls(chain)
        .into_iter()
        .find(|poll| poll.poll_id == poll_id)
}

/// Tallies the votes for one poll.
///
/// Returns `(option, count)` pairs in the order the poll declared its
/// options. Votes naming an option the poll does not have are ignored,
/// as are votes for other polls. `None` if the poll does not exist.
pub fn poll_results(chain: &[Block], poll_id: &str) -> Option<Vec<(String, u64)>> {
    let poll = find_poll_by_id(chain, poll_id)?;

    let mut counts: HashMap<&str, u64> = poll
        .options
        .iter()
        .map(|option| (option.as_str(), 0))
        .collect();

    for action in poll_actions(chain) {
        if let PollAction::Vote {
            poll_id: voted_id,
            vote,
        } = action
        {
            if voted_id == poll_id {
                if let Some(count) = counts.get_mut(vote.as_str()) {
                    *count += 1;
                }
            }
        }
    }

    Some(
        poll.options
            .iter()
            .map(|option| (option.clone(), counts[option.as_str()]))
            .collect(),
    )
}

/// Submits a create-poll transaction with a fresh UUID-v4 poll id.
/// Returns the id so callers can vote on it later.
pub async fn create_poll(peer: &Peer, poll_name: &str, options: Vec<String>) -> String {
    let poll_id = Uuid::new_v4().to_string();
    peer.submit_transaction(TxData::create_poll(
        poll_id.clone(),
        poll_name.to_string(),
        options,
    ))
    .await;
    poll_id
}

/// Submits a vote transaction.
pub async fn vote(peer: &Peer, poll_id: &str, option: &str) {
    peer.submit_transaction(TxData::vote(poll_id.to_string(), option.to_string()))
        .await;
}

/// Runs a scenario file against a peer.
///
/// Line verbs: `CREATE <poll_name> <opt1> <opt2> ...`,
/// `VOTE <poll_name> <option>`, `SLEEP <seconds>`. Unknown verbs and
/// votes for polls that do not exist yet are logged and skipped.
pub async fn run_scenario(peer: &Peer, path: &Path) -> std::io::Result<()> {
    let contents = std::fs::read_to_string(path)?;

    for line in contents.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            ["CREATE", poll_name, options @ ..] if !options.is_empty() => {
                let options: Vec<String> = options.iter().map(|s| s.to_string()).collect();
                create_poll(peer, poll_name, options.clone()).await;
                tracing::info!(poll_name, ?options, "scenario: submitted create");
            }
            ["VOTE", poll_name, option] => {
                let chain = peer.snapshot_chain().await;
                match find_poll_by_name(&chain, poll_name) {
                    Some(poll) => {
                        vote(peer, &poll.poll_id, option).await;
                        tracing::info!(poll_name, option, "scenario: submitted vote");
                    }
                    None => {
                        tracing::warn!(poll_name, "scenario: vote for unknown poll skipped");
                    }
                }
            }
            ["SLEEP", seconds] => match seconds.parse::<f64>() {
                Ok(seconds) if seconds >= 0.0 => {
                    tracing::info!(seconds, "scenario: sleeping");
                    tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
                }
                _ => tracing::warn!(line, "scenario: bad SLEEP duration skipped"),
            },
            _ => {
                tracing::warn!(line, "scenario: unsupported command skipped");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Identity, Transaction, unix_timestamp};
    use std::sync::OnceLock;

    const DIFFICULTY: usize = 1;

    fn test_identity() -> &'static Identity {
        static IDENTITY: OnceLock<Identity> = OnceLock::new();
        IDENTITY.get_or_init(|| Identity::generate().expect("keygen"))
    }

    fn mined_block(id: i64, prev_hash: String, data: TxData) -> Block {
        let identity = test_identity();
        let mut txn = Transaction::new(identity.peer_id().clone(), unix_timestamp(), data);
        txn.sign(identity);

        let mut block = Block::candidate(id, vec![txn], prev_hash, unix_timestamp());
        let mut nonce = 0;
        while !block.try_seal(nonce, DIFFICULTY) {
            nonce += 1;
        }
        block
    }

    /// Chain: create "lunch" (pizza/sushi), two votes for pizza, one
    /// vote for sushi, one vote for a bogus option, one vote for a
    /// different poll id.
    fn sample_chain() -> Vec<Block> {
        let create = TxData::create_poll(
            "lunch-id".to_string(),
            "lunch".to_string(),
            vec!["pizza".to_string(), "sushi".to_string()],
        );
        let votes = [
            TxData::vote("lunch-id".to_string(), "pizza".to_string()),
            TxData::vote("lunch-id".to_string(), "pizza".to_string()),
            TxData::vote("lunch-id".to_string(), "sushi".to_string()),
            TxData::vote("lunch-id".to_string(), "ramen".to_string()),
            TxData::vote("other-id".to_string(), "pizza".to_string()),
        ];

        let mut chain = Vec::new();
        let mut prev_hash = crate::types::GENESIS_PREV_HASH.to_string();
        let mut id = 0;
        for data in std::iter::once(create).chain(votes) {
            let block = mined_block(id, prev_hash.clone(), data);
            prev_hash = block.hash.as_str().to_string();
            chain.push(block);
            id += 1;
        }
        chain
    }

    #[test]
    fn polls_are_listed_and_found() {
        let chain = sample_chain();
        let polls = all_polls(&chain);
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].poll_name, "lunch");

        assert_eq!(find_poll_by_name(&chain, "lunch"), Some(polls[0].clone()));
        assert_eq!(find_poll_by_id(&chain, "lunch-id"), Some(polls[0].clone()));
        assert!(find_poll_by_name(&chain, "dinner").is_none());
    }

    #[test]
    fn tallies_count_only_known_options_of_the_right_poll() {
        let chain = sample_chain();
        let results = poll_results(&chain, "lunch-id").expect("poll exists");
        assert_eq!(
            results,
            vec![("pizza".to_string(), 2), ("sushi".to_string(), 1)]
        );
    }

    #[test]
    fn results_for_unknown_poll_are_none() {
        let chain = sample_chain();
        assert!(poll_results(&chain, "no-such-poll").is_none());
    }

    #[test]
    fn opaque_payloads_are_invisible_to_poll_queries() {
        let mut chain = sample_chain();
        let prev_hash = chain.last().unwrap().hash.as_str().to_string();
        let opaque = TxData::Opaque(serde_json::json!({
            "transaction_type": "delegate",
            "to": "someone"
        }));
        let next_id = chain.len() as i64;
        chain.push(mined_block(next_id, prev_hash, opaque));

        assert_eq!(all_polls(&chain).len(), 1);
        let results = poll_results(&chain, "lunch-id").expect("poll exists");
        assert_eq!(results[0].1, 2);
    }
}
