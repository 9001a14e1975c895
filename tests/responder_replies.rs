mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{header, RecordingTransport};
use meshbaba::config::AutoresponderConfig;
use meshbaba::meshtastic::{
    Dispatcher, Inbound, MeshHandler, MessageKind, NodeInfo, TextMessage, BROADCAST_ADDR,
};
use meshbaba::responder::Responder;
use meshbaba::storage::PeerStore;

const SELF_ID: u32 = 0xABBA_BABA;

fn setup() -> (Responder, Arc<RecordingTransport>, Arc<PeerStore>) {
    let transport = Arc::new(RecordingTransport::default());
    let peers = Arc::new(PeerStore::new());
    let responder = Responder::new(
        transport.clone(),
        peers.clone(),
        &AutoresponderConfig::default(),
    );
    (responder, transport, peers)
}

#[test]
fn unknown_sender_broadcast_test_gets_signal_report() {
    let (responder, transport, _peers) = setup();
    let h = header(0xDEAD_BEEF, BROADCAST_ADDR, 8, 5, 5);
    responder.on_text_message(&h, &TextMessage::new("Test 1 2 3"));

    let sent = transport.texts();
    assert_eq!(sent.len(), 1);
    let reply = &sent[0];
    assert_eq!(reply.text, "Pong!  (rssi: -42.3 dBm, snr: 7.1 dB)");
    assert_eq!(reply.to, BROADCAST_ADDR);
    assert_eq!(reply.channel, 8);
    assert!(reply.broadcast);
    assert_eq!(reply.kind, MessageKind::Text);
    assert!(!reply.want_response);
    assert_eq!(reply.reply_id, h.id);
    assert_eq!(reply.priority, 0);
}

#[test]
fn relayed_ping_reports_hops() {
    let (responder, transport, _peers) = setup();
    let h = header(0x1234, BROADCAST_ADDR, 2, 7, 4);
    responder.on_text_message(&h, &TextMessage::new("PING"));
    assert_eq!(transport.texts()[0].text, "Pong!  (hops: 3)");
}

#[test]
fn direct_message_reply_goes_to_sender_on_primary_channel() {
    let (responder, transport, _peers) = setup();
    let h = header(0x1234, SELF_ID, 5, 3, 3);
    responder.on_text_message(&h, &TextMessage::new("teszt"));
    let sent = transport.texts();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, 0x1234);
    assert_eq!(sent[0].channel, 0);
    assert!(!sent[0].broadcast);
}

#[test]
fn seq_test_warns_with_known_short_name() {
    let (responder, transport, peers) = setup();
    peers.upsert(NodeInfo::new(0x5555, "KOVI", "Kovi mobile", 0));
    let h = header(0x5555, BROADCAST_ADDR, 3, 3, 1);
    responder.on_text_message(&h, &TextMessage::new("SEQ 17"));

    let sent = transport.texts();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.starts_with("KOVI! "));
    assert_eq!(sent[0].to, BROADCAST_ADDR);
    assert_eq!(sent[0].channel, 3);
    assert!(!sent[0].broadcast);
}

#[test]
fn message_matching_both_sets_gets_two_replies() {
    let transport = Arc::new(RecordingTransport::default());
    let peers = Arc::new(PeerStore::new());
    let cfg = AutoresponderConfig {
        seq_prefixes: vec!["test ".into()],
        ..AutoresponderConfig::default()
    };
    let responder = Responder::new(transport.clone(), peers, &cfg);
    let h = header(0xCAFE, BROADCAST_ADDR, 1, 2, 1);
    responder.on_text_message(&h, &TextMessage::new("test seq"));

    let sent = transport.texts();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].text, "Pong!  (hops: 1)");
    assert!(sent[0].broadcast);
    assert!(sent[1].text.starts_with("0x0000CAFE! "));
    assert!(!sent[1].broadcast);
}

#[test]
fn other_messages_are_ignored() {
    let (responder, transport, peers) = setup();
    let h = header(0x42, BROADCAST_ADDR, 0, 3, 3);
    for body in ["hello", "pseq 1", "", "a ping"] {
        responder.on_text_message(&h, &TextMessage::new(body));
    }
    assert!(transport.texts().is_empty());
    assert!(peers.is_empty());
    assert!(!peers.needs_save());
}

#[test]
fn failed_send_is_not_retried() {
    let (responder, transport, _peers) = setup();
    transport.fail.store(true, Ordering::SeqCst);
    let h = header(0x42, BROADCAST_ADDR, 0, 3, 3);
    responder.on_text_message(&h, &TextMessage::new("ping"));
    transport.fail.store(false, Ordering::SeqCst);
    responder.on_text_message(&h, &TextMessage::new("hello"));
    assert!(transport.texts().is_empty());
}

#[test]
fn client_role_advisory_fires_once_per_peer() {
    let transport = Arc::new(RecordingTransport::default());
    let peers = Arc::new(PeerStore::new());
    let responder = Arc::new(Responder::new(
        transport.clone(),
        peers.clone(),
        &AutoresponderConfig::default(),
    ));
    let identity = Arc::new(NodeInfo::new(SELF_ID, "Info", "Info node", 1));
    let mut dispatcher = Dispatcher::new(identity, peers.clone(), transport.clone(), responder);

    let peer = NodeInfo::new(0x7777, "NEWB", "Newbie", 0);
    for _ in 0..3 {
        dispatcher.handle(Inbound::NodeInfo {
            header: header(0x7777, BROADCAST_ADDR, 0, 3, 3),
            info: peer.clone(),
            want_response: false,
        });
    }

    let sent = transport.texts();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].text,
        "NEWB! please reconsider whether CLIENT role is right for you, see https://meshtastic.creativo.hu"
    );
    assert_eq!(sent[0].to, 0x7777);
    assert_eq!(sent[0].channel, 0);
    assert!(!sent[0].broadcast);
    assert_eq!(sent[0].reply_id, 0);
    assert_eq!(peers.len(), 1);
}

#[test]
fn non_client_new_peer_gets_no_advisory() {
    let (responder, transport, _peers) = setup();
    let h = header(0x8888, BROADCAST_ADDR, 0, 3, 3);
    responder.on_node_info(&h, &NodeInfo::new(0x8888, "RTR", "Router", 2), false, true);
    responder.on_node_info(&h, &NodeInfo::new(0x8888, "CLI", "Client", 0), false, false);
    assert!(transport.texts().is_empty());
}
