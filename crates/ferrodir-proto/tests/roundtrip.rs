//! Whole-protocol round-trip coverage: every message type, every supported
//! version, including routing sentinels.

use ferrodir_proto::*;
use ferrodir_types::replica::{ALL_REPLICAS, CLOSEST_REPLICA, UNKNOWN_REPLICA};
use ferrodir_types::{
    AttrDescription, Attribute, ChangeNumber, Dn, ModType, Modification, ServerState,
};
use proptest::prelude::*;

fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}

fn cn(time: u64, seq: u32, replica: i32) -> ChangeNumber {
    ChangeNumber::new(time, seq, replica)
}

fn sample_state() -> ServerState {
    let mut state = ServerState::new();
    state.update(cn(1_000, 1, 1));
    state.update(cn(2_000, 9, 2));
    state
}

fn sample_messages(version: ProtocolVersion) -> Vec<ReplicationMsg> {
    let base = dn("dc=example,dc=com");
    let mut ack = AckMsg::new(cn(5_000, 2, 3));
    ack.has_replay_error = true;
    ack.failed_replicas = vec![1, 4];
    vec![
        ReplicationMsg::Update(UpdateMsg::add(
            cn(1, 1, 1),
            "uuid-add",
            base.child("cn=a"),
            vec![Attribute::new(
                AttrDescription::new("objectclass"),
                vec!["top".into()],
            )],
        )),
        ReplicationMsg::Update(UpdateMsg::modify(
            cn(2, 1, 1),
            "uuid-mod",
            base.child("cn=a"),
            vec![Modification::with_values(
                ModType::Replace,
                AttrDescription::new("description"),
                &["x"],
            )],
        )),
        ReplicationMsg::Update(UpdateMsg::delete(cn(3, 1, 2), "uuid-del", base.child("cn=a"))),
        ReplicationMsg::Update(UpdateMsg::modify_dn(
            cn(4, 1, 2),
            "uuid-moddn",
            base.child("cn=a"),
            "cn=b",
            true,
            Some(base.child("ou=staff")),
            Some("uuid-parent".to_string()),
        )),
        ReplicationMsg::Ack(ack),
        ReplicationMsg::Error(ErrorMsg {
            sender: 1,
            destination: UNKNOWN_REPLICA,
            code: 77,
            details: "export aborted".to_string(),
            creation_time_ms: (version >= PROTOCOL_V4).then_some(1_700_000_000_000),
        }),
        ReplicationMsg::MonitorRequest(MonitorRequestMsg::new(1, ALL_REPLICAS)),
        ReplicationMsg::InitializeRequest(InitializeRequestMsg::new(
            base.clone(),
            2,
            CLOSEST_REPLICA,
            if version >= PROTOCOL_V4 { 128 } else { 0 },
        )),
        ReplicationMsg::InitializeTarget(InitializeTargetMsg {
            destination: 2,
            base_dn: base.clone(),
            sender: 3,
            requestor: 2,
            entry_count: 10_000,
            init_window: if version >= PROTOCOL_V4 { 128 } else { 0 },
        }),
        ReplicationMsg::ReplServerStart(ReplServerStartMsg {
            version,
            generation_id: 31337,
            replica_id: 9,
            server_url: "rs1.example.com:8989".to_string(),
            base_dn: base,
            window_size: 100,
            ssl_encryption: false,
            degraded_status_threshold: if version >= PROTOCOL_V2 { 5_000 } else { -1 },
            server_state: sample_state(),
        }),
        ReplicationMsg::ResetGenerationId(ResetGenerationIdMsg::new(-1)),
    ]
}

#[test]
fn every_message_roundtrips_on_every_version() {
    for version in PROTOCOL_V1..=CURRENT_PROTOCOL_VERSION {
        for msg in sample_messages(version) {
            let encoded = msg.encode(version).unwrap();
            let decoded = ReplicationMsg::decode(&encoded, version)
                .unwrap_or_else(|e| panic!("v{version}: {e} for {msg:?}"));
            assert_eq!(decoded, msg, "version {version}");
        }
    }
}

#[test]
fn tags_are_distinct() {
    let mut tags: Vec<u8> = sample_messages(CURRENT_PROTOCOL_VERSION)
        .iter()
        .map(|m| m.encode(CURRENT_PROTOCOL_VERSION).unwrap()[0])
        .collect();
    tags.sort_unstable();
    tags.dedup();
    // Four update kinds share the Update variant; 11 distinct tags total.
    assert_eq!(tags.len(), 11);
}

proptest! {
    #[test]
    fn ack_roundtrips_with_arbitrary_failed_lists(
        time in 0u64..1u64 << 48,
        seq in any::<u32>(),
        replica in 0i32..1024,
        timeout in any::<bool>(),
        wrong_status in any::<bool>(),
        replay_error in any::<bool>(),
        failed in prop::collection::vec(-3i32..2048, 0..16),
    ) {
        let msg = AckMsg {
            change_number: cn(time, seq, replica),
            has_timeout: timeout,
            has_wrong_status: wrong_status,
            has_replay_error: replay_error,
            failed_replicas: failed,
        };
        let decoded = AckMsg::decode(
            &msg.encode(CURRENT_PROTOCOL_VERSION),
            CURRENT_PROTOCOL_VERSION,
        ).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn error_details_roundtrip(details in "[^\u{0}]{0,64}") {
        let msg = ErrorMsg {
            sender: 1,
            destination: 2,
            code: 5,
            details,
            creation_time_ms: Some(1),
        };
        let decoded = ErrorMsg::decode(
            &msg.encode(CURRENT_PROTOCOL_VERSION),
            CURRENT_PROTOCOL_VERSION,
        ).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn decoder_never_panics_on_garbage(buf in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = ReplicationMsg::decode(&buf, CURRENT_PROTOCOL_VERSION);
    }
}
