//! Integration tests for the chain manager over the in-memory store

use consensus_core::*;
use std::sync::{Arc, Mutex};
use std::thread;

fn mine(mut header: Header, params: &NetworkParams) -> Header {
    while header.check_proof_of_work(params).is_err() {
        let nonce = header.nonce() + 1;
        header.set_nonce(nonce).unwrap();
    }
    header
}

fn mine_block(prev: Sha256Hash, time: u32, tag: u32, params: &NetworkParams) -> FullBlock {
    let mut script = tag.to_le_bytes().to_vec();
    script.push(0x51);
    let coinbase = Tx::from_parts(1, vec![TxInput::coinbase(script)], vec![TxOutput::new(50 * COIN, vec![0x51])], 0);
    let header = Header::new(1, prev, Sha256Hash::ZERO, time, params.pow_limit_bits, 0);
    let mut block = FullBlock::new(header, vec![coinbase]);
    while block.header().check_proof_of_work(params).is_err() {
        let header = block.header_mut().unwrap();
        let nonce = header.nonce() + 1;
        header.set_nonce(nonce).unwrap();
    }
    block
}

fn headers_on(prev: Sha256Hash, count: usize, salt: u32, params: &NetworkParams) -> Vec<Header> {
    let mut prev = prev;
    (0..count)
        .map(|i| {
            let header = mine(
                Header::new(1, prev, Sha256Hash::ZERO, 1_600_000_000 + salt + i as u32 * 600, params.pow_limit_bits, 0),
                params,
            );
            prev = header.hash();
            header
        })
        .collect()
}

fn regtest() -> (NetworkParams, BlockChain<MemoryBlockStore>) {
    let params = NetworkParams::regtest();
    let store = MemoryBlockStore::for_network(&params).unwrap();
    let chain = BlockChain::new(store, params.clone()).unwrap();
    (params, chain)
}

#[test]
fn test_full_blocks_accumulate_totals() {
    let (params, chain) = regtest();
    let mut prev = chain.chain_head().hash();
    for i in 0..5 {
        let block = mine_block(prev, 1_600_000_000 + i * 600, i, &params);
        prev = block.hash();
        assert!(chain.accept_block(&block).unwrap().is_new_tip());
    }

    let head = chain.chain_head();
    assert_eq!(head.height(), 5);
    assert_eq!(head.chain_info().total_chain_txs(), 6);
    assert_eq!(head.meta().tx_count(), 1);
    assert!(head.meta().block_size() > HEADER_SIZE as i64);
}

#[test]
fn test_header_only_blocks_have_unknown_totals() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    for header in headers_on(genesis.hash(), 2, 0, &params) {
        chain.accept_header(header).unwrap();
    }
    let head = chain.chain_head();
    assert_eq!(head.meta().tx_count(), -1);
    assert_eq!(head.chain_info().total_chain_txs(), -1);
}

#[test]
fn test_invalid_block_is_not_stored() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    let block = mine_block(genesis.hash(), 1_600_000_000, 1, &params);

    // Drop the coinbase commitment by pointing the header at another root
    let mut tampered = FullBlock::parse(block.serialize()).unwrap();
    tampered.make_mutable();
    let header = tampered.header_mut().unwrap();
    header.make_mutable();
    header.set_merkle_root(Sha256Hash::twice_of(b"other")).unwrap();
    let mined = mine(header.clone(), &params);
    header.set_nonce(mined.nonce()).unwrap();

    assert!(matches!(chain.accept_block(&tampered), Err(ConsensusError::Verification(_))));
    assert_eq!(chain.store().len(), 1);
}

#[test]
fn test_chain_work_grows_along_best_chain() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    for header in headers_on(genesis.hash(), 12, 0, &params) {
        chain.accept_header(header).unwrap();
    }

    let store = chain.store();
    let mut cursor = chain.chain_head();
    while let Some(prev) = store.get_prev(&cursor).unwrap() {
        assert!(cursor.chain_work() > prev.chain_work());
        assert_eq!(cursor.height(), prev.height() + 1);
        cursor = prev;
    }
    assert_eq!(cursor.hash(), genesis.hash());
}

#[test]
fn test_siblings_share_parent_work() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    let left = headers_on(genesis.hash(), 1, 0, &params).remove(0);
    let right = headers_on(genesis.hash(), 1, 1, &params).remove(0);

    let first = chain.accept_header(left.clone()).unwrap();
    let second = chain.accept_header(right.clone()).unwrap();
    assert!(first.is_new_tip());
    let sibling = match second {
        AcceptOutcome::SideBranch(block) => block,
        other => panic!("expected side branch, got {:?}", other),
    };

    let stored_left = chain.store().get(&left.hash()).unwrap().unwrap();
    assert_eq!(stored_left.height(), sibling.height());
    assert_eq!(stored_left.chain_work(), sibling.chain_work());
    assert_eq!(chain.chain_head().hash(), left.hash());
}

#[test]
fn test_median_time_past_of_head() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    for header in headers_on(genesis.hash(), 11, 0, &params) {
        chain.accept_header(header).unwrap();
    }
    // Eleven blocks at 600 s spacing, median is the sixth from the tip
    let head = chain.chain_head();
    assert_eq!(chain.median_time_past(&head).unwrap(), 1_600_000_000 + 5 * 600);
}

#[test]
fn test_rollback_notifies_and_replay_restores_head() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    let headers = headers_on(genesis.hash(), 6, 0, &params);
    for header in headers.clone() {
        chain.accept_header(header).unwrap();
    }
    let head = chain.chain_head();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    chain.add_reorganize_listener(Arc::new(move |split: &LiteBlock, old: &[LiteBlock], new: &[LiteBlock]| {
        let heights: Vec<i32> = old.iter().map(|b| b.height()).collect();
        log.lock().unwrap().push((split.height(), heights, new.len()));
    }));

    chain.rollback(3).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![(3, vec![6, 5, 4], 0)]);

    for header in headers.into_iter().skip(3) {
        chain.accept_header(header).unwrap();
    }
    assert_eq!(chain.chain_head(), head);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_out_of_order_delivery_converges() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    let headers = headers_on(genesis.hash(), 8, 0, &params);

    for header in headers.iter().skip(1).rev() {
        assert!(matches!(chain.accept_header(header.clone()).unwrap(), AcceptOutcome::Orphan { .. }));
    }
    assert_eq!(chain.orphan_root(&headers[7].hash()), Some(headers[1].hash()));

    chain.accept_header(headers[0].clone()).unwrap();
    assert_eq!(chain.drain_orphans().unwrap().len(), 7);
    assert_eq!(chain.chain_head().hash(), headers[7].hash());
}

#[test]
fn test_concurrent_acceptance_picks_heaviest_branch() {
    let (params, chain) = regtest();
    let chain = Arc::new(chain);
    let genesis = chain.chain_head();
    let short = headers_on(genesis.hash(), 3, 0, &params);
    let long = headers_on(genesis.hash(), 5, 1, &params);
    let expected = long[4].hash();

    let handles: Vec<_> = [short, long]
        .into_iter()
        .map(|branch| {
            let chain = Arc::clone(&chain);
            thread::spawn(move || {
                for header in branch {
                    chain.accept_header(header).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(chain.best_height(), 5);
    assert_eq!(chain.chain_head().hash(), expected);
    assert_eq!(chain.store().len(), 9);
}

/// Testnet-style network whose chain starts at a mid-window block.
fn testnet_chain(root_bits: u32) -> (NetworkParams, BlockChain<MemoryBlockStore>) {
    let params = NetworkParams::testnet();
    let root_header = Header::new(1, Sha256Hash::twice_of(b"parent"), Sha256Hash::ZERO, 1_500_000_000, root_bits, 0);
    let root = LiteBlock::new(root_header.clone(), BlockMeta::unknown(), ChainInfo::new(root_header.work(), 1000, -1));
    let store = MemoryBlockStore::new(&root);
    let config = ChainConfig { check_proof_of_work: false, ..ChainConfig::default() };
    let chain = BlockChain::with_config(store, params.clone(), config).unwrap();
    (params, chain)
}

#[test]
fn test_testnet_late_block_may_use_pow_limit() {
    let (params, chain) = testnet_chain(0x1c00ffff);
    let root = chain.chain_head();

    let late = Header::new(1, root.hash(), Sha256Hash::ZERO, root.time() + 1201, params.pow_limit_bits, 0);
    assert!(chain.accept_header(late).unwrap().is_new_tip());
}

#[test]
fn test_testnet_timely_block_keeps_difficulty() {
    let (params, chain) = testnet_chain(0x1c00ffff);
    let root = chain.chain_head();

    let easy = Header::new(1, root.hash(), Sha256Hash::ZERO, root.time() + 600, params.pow_limit_bits, 0);
    assert!(matches!(chain.accept_header(easy), Err(ConsensusError::Verification(_))));

    let timely = Header::new(1, root.hash(), Sha256Hash::ZERO, root.time() + 600, 0x1c00ffff, 0);
    assert!(chain.accept_header(timely).unwrap().is_new_tip());
}

#[test]
fn test_rollback_past_stored_history_leaves_head() {
    let (_, chain) = testnet_chain(0x1c00ffff);
    let root = chain.chain_head();
    let next = Header::new(1, root.hash(), Sha256Hash::ZERO, root.time() + 600, 0x1c00ffff, 0);
    assert!(chain.accept_header(next.clone()).unwrap().is_new_tip());

    let notified = Arc::new(Mutex::new(0));
    let count = Arc::clone(&notified);
    chain.add_reorganize_listener(Arc::new(move |_: &LiteBlock, _: &[LiteBlock], _: &[LiteBlock]| {
        *count.lock().unwrap() += 1;
    }));

    // The root's parent was never stored, so the walk breaks below height 1000
    assert!(matches!(chain.rollback(500), Err(ConsensusError::BlockStore(_))));
    assert_eq!(chain.best_height(), 1001);
    assert_eq!(chain.chain_head().hash(), next.hash());
    assert_eq!(chain.store().get_chain_head().unwrap().hash(), next.hash());
    assert_eq!(*notified.lock().unwrap(), 0);

    assert_eq!(chain.rollback(1000).unwrap().hash(), root.hash());
}

#[test]
fn test_chain_reopens_from_store_head() {
    let (params, chain) = regtest();
    let genesis = chain.chain_head();
    for header in headers_on(genesis.hash(), 3, 0, &params) {
        chain.accept_header(header).unwrap();
    }
    let head = chain.chain_head();

    let record = head.serialize();
    let store = MemoryBlockStore::new(&LiteBlock::parse(record).unwrap());
    let reopened = BlockChain::new(store, params).unwrap();
    assert_eq!(reopened.chain_head(), head);
    assert_eq!(reopened.best_height(), 3);
}
