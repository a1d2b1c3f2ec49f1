//! Client Registry Tests
//!
//! Tests for identity reconciliation and client lifecycle:
//! - Merging facts from several providers into one client
//! - Client id stability across connection churn
//! - Primary provider selection and reselection
//! - Duplicate fact idempotence
//! - Grace-period eviction and reactivation

use deskhub_core::{ClientManifest, ConnectionState, ProviderKind};
use deskhub_router::{ClientChange, ClientRegistry, ClientUpdate, RegistryConfig};
use deskhub_test_utils::{fact, latency, named_fact, socket, usb, Collector};
use std::sync::Arc;
use std::time::Duration;

fn registry() -> Arc<ClientRegistry> {
    ClientRegistry::new(RegistryConfig::default())
}

/// Let spawned timer tasks run after the clock moved
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_usb_and_socket_merge_into_one_client() {
    let registry = registry();

    registry.report_connection_fact(
        named_fact(usb(), "serial-1", ConnectionState::Connecting, "CarThing-1")
            .with_client_id("X"),
    );
    registry.report_connection_fact(named_fact(
        usb(),
        "serial-1",
        ConnectionState::Connected,
        "CarThing-1",
    ));
    let merged = registry
        .report_connection_fact(named_fact(
            socket(),
            "conn-7",
            ConnectionState::Connected,
            "CarThing-1",
        ))
        .expect("fact should apply");

    assert_eq!(merged, "X");
    let clients = registry.get_clients();
    assert_eq!(clients.len(), 1, "expected exactly one client");

    let client = &clients[0];
    assert_eq!(client.client_id, "X");
    assert_eq!(client.active_identifiers().count(), 2);
    assert_eq!(client.primary_provider, Some(socket()));
    assert_eq!(client.connection_state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_unknown_hint_becomes_client_id() {
    let registry = registry();
    let id = registry
        .report_connection_fact(
            fact(socket(), "conn-1", ConnectionState::Connected).with_client_id("abc"),
        )
        .unwrap();
    assert_eq!(id, "abc");
}

#[tokio::test]
async fn test_hint_for_existing_client_merges() {
    let registry = registry();
    let id = registry
        .report_connection_fact(fact(usb(), "serial-1", ConnectionState::Connected))
        .unwrap();

    let merged = registry
        .report_connection_fact(
            fact(socket(), "conn-1", ConnectionState::Connected).with_client_id(id.clone()),
        )
        .unwrap();

    assert_eq!(merged, id);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_same_identity_on_two_live_endpoints_splits() {
    let registry = registry();
    let first = registry
        .report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"))
        .unwrap();
    let second = registry
        .report_connection_fact(named_fact(usb(), "serial-2", ConnectionState::Connected, "Pad"))
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_identity_matching_several_clients_splits() {
    let registry = registry();
    registry.report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"));
    registry.report_connection_fact(named_fact(usb(), "serial-2", ConnectionState::Connected, "Pad"));

    registry.report_connection_fact(named_fact(
        socket(),
        "conn-1",
        ConnectionState::Connected,
        "Pad",
    ));
    assert_eq!(registry.len(), 3, "ambiguous fact must not merge");
}

#[tokio::test]
async fn test_manifest_id_takes_precedence_over_name() {
    let registry = registry();
    let mut manifest = ClientManifest::named("Pad");
    manifest.id = Some("device-1".into());
    registry.report_connection_fact(
        fact(usb(), "serial-1", ConnectionState::Connected).with_manifest(manifest.clone()),
    );

    manifest.name = "Renamed".into();
    registry.report_connection_fact(
        fact(socket(), "conn-1", ConnectionState::Connected).with_manifest(manifest),
    );
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_late_manifest_folds_socket_client_into_usb_record() {
    let registry = registry();
    let updates: Collector<ClientUpdate> = Collector::new();
    let _sub = registry.on_connection_fact(updates.listener());

    registry.report_connection_fact(
        named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad").with_client_id("X"),
    );
    let early = registry
        .report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connected))
        .unwrap();
    assert_ne!(early, "X");
    assert_eq!(registry.len(), 2);

    let folded = registry.report_connection_fact(named_fact(
        socket(),
        "conn-1",
        ConnectionState::Established,
        "Pad",
    ));
    assert_eq!(folded.as_deref(), Some("X"));
    assert_eq!(registry.len(), 1);
    assert!(registry.get_client(&early).is_none());

    let client = registry.client_for_provider(&socket(), "conn-1").unwrap();
    assert_eq!(client.client_id, "X");
    assert_eq!(client.active_identifiers().count(), 2);
    assert_eq!(client.connection_state, ConnectionState::Established);

    let removed: Vec<ClientUpdate> = updates
        .events()
        .into_iter()
        .filter(|u| u.change == ClientChange::Removed)
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].client_id, early);
}

#[tokio::test]
async fn test_late_device_manifest_folds_into_usb_record() {
    let registry = registry();
    registry.report_connection_fact(
        named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad").with_client_id("X"),
    );
    let early = registry
        .report_connection_fact(
            fact(socket(), "conn-1", ConnectionState::Established).with_meta(latency(12)),
        )
        .unwrap();

    assert!(registry.update_manifest(&early, ClientManifest::named("Pad")));
    assert_eq!(registry.len(), 1);

    let client = registry.get_client("X").unwrap();
    let socket_id = &client.identifiers[&socket()];
    assert_eq!(socket_id.provider_id, "conn-1");
    assert_eq!(socket_id.latency_ms, Some(12));
    assert_eq!(client.primary_provider, Some(socket()));
}

#[tokio::test]
async fn test_late_manifest_matching_several_clients_stays_split() {
    let registry = registry();
    registry.report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"));
    registry.report_connection_fact(named_fact(usb(), "serial-2", ConnectionState::Connected, "Pad"));
    let early = registry
        .report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connected))
        .unwrap();

    let after = registry.report_connection_fact(named_fact(
        socket(),
        "conn-1",
        ConnectionState::Established,
        "Pad",
    ));
    assert_eq!(after.as_deref(), Some(early.as_str()));
    assert_eq!(registry.len(), 3);
}

// ============================================================================
// Client id stability and primary selection
// ============================================================================

#[tokio::test]
async fn test_client_id_stable_across_churn() {
    let registry = registry();
    let id = registry
        .report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"))
        .unwrap();

    for i in 0..5 {
        let conn = format!("conn-{}", i);
        let got = registry
            .report_connection_fact(named_fact(
                socket(),
                &conn,
                ConnectionState::Established,
                "Pad",
            ))
            .unwrap();
        assert_eq!(got, id);
        registry.report_connection_fact(fact(socket(), &conn, ConnectionState::Disconnected));
        assert_eq!(registry.get_client(&id).unwrap().client_id, id);
    }
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_primary_follows_active_identifiers() {
    let registry = registry();
    let id = registry
        .report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"))
        .unwrap();
    registry.report_connection_fact(named_fact(
        socket(),
        "conn-1",
        ConnectionState::Connected,
        "Pad",
    ));
    assert_eq!(registry.get_client(&id).unwrap().primary_provider, Some(socket()));

    registry.report_connection_fact(fact(socket(), "conn-1", ConnectionState::Disconnected));
    let client = registry.get_client(&id).unwrap();
    assert_eq!(client.primary_provider, Some(usb()));
    assert!(client.primary_identifier().is_some());

    registry.report_connection_fact(fact(usb(), "serial-1", ConnectionState::Disconnected));
    let client = registry.get_client(&id).unwrap();
    assert_eq!(client.primary_provider, None);
    assert_eq!(client.connection_state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_lower_latency_takes_primary() {
    let registry = registry();
    let id = registry
        .report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"))
        .unwrap();
    registry.report_connection_fact(
        named_fact(socket(), "conn-1", ConnectionState::Connected, "Pad").with_meta(latency(40)),
    );
    assert_eq!(registry.get_client(&id).unwrap().primary_provider, Some(socket()));

    registry.report_connection_fact(
        fact(usb(), "serial-1", ConnectionState::Connected).with_meta(latency(3)),
    );
    assert_eq!(registry.get_client(&id).unwrap().primary_provider, Some(usb()));
}

#[tokio::test]
async fn test_offline_usb_device_is_inactive() {
    let registry = registry();
    let mut meta = latency(1);
    meta.offline = Some(true);
    let id = registry
        .report_connection_fact(fact(usb(), "serial-1", ConnectionState::Connected).with_meta(meta))
        .unwrap();

    let client = registry.get_client(&id).unwrap();
    assert!(!client.is_active());
    assert_eq!(client.primary_provider, None);
}

#[tokio::test]
async fn test_failed_state_when_nothing_live() {
    let registry = registry();
    let id = registry
        .report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connecting))
        .unwrap();
    registry.report_connection_fact(fact(socket(), "conn-1", ConnectionState::Failed));
    assert_eq!(
        registry.get_client(&id).unwrap().connection_state,
        ConnectionState::Failed
    );
}

#[tokio::test]
async fn test_established_wins_over_connected() {
    let registry = registry();
    let id = registry
        .report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"))
        .unwrap();
    registry.report_connection_fact(named_fact(
        socket(),
        "conn-1",
        ConnectionState::Established,
        "Pad",
    ));
    assert!(registry.get_client(&id).unwrap().is_established());
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_duplicate_fact_emits_nothing() {
    let registry = registry();
    let lists: Collector<Vec<deskhub_core::Client>> = Collector::new();
    let _sub = registry.on_client_list_changed(lists.listener());

    let f = named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad");
    registry.report_connection_fact(f.clone());
    assert_eq!(lists.len(), 1);
    let before = registry.get_clients();

    registry.report_connection_fact(f);
    assert_eq!(lists.len(), 1, "duplicate fact must not emit");
    assert_eq!(registry.get_clients(), before);
}

#[tokio::test]
async fn test_updates_carry_previous_state() {
    let registry = registry();
    let updates: Collector<ClientUpdate> = Collector::new();
    let _sub = registry.on_connection_fact(updates.listener());

    registry.report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connected));
    registry.report_connection_fact(fact(socket(), "conn-1", ConnectionState::Established));

    let events = updates.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].change, ClientChange::Added);
    assert_eq!(events[0].previous_state, None);
    assert_eq!(events[1].change, ClientChange::Updated);
    assert_eq!(events[1].previous_state, Some(ConnectionState::Connected));
    assert!(events[1].became_established());
}

#[tokio::test]
async fn test_dropped_subscription_stops_events() {
    let registry = registry();
    let lists: Collector<Vec<deskhub_core::Client>> = Collector::new();
    let sub = registry.on_client_list_changed(lists.listener());

    registry.report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connected));
    drop(sub);
    registry.report_connection_fact(fact(socket(), "conn-2", ConnectionState::Connected));
    assert_eq!(lists.len(), 1);
}

#[test]
fn test_concurrent_facts_end_on_latest_client_list() {
    for _ in 0..100 {
        let registry = registry();
        let lists: Collector<Vec<deskhub_core::Client>> = Collector::new();
        let _sub = registry.on_client_list_changed(lists.listener());

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let id = format!("conn-{}-{}", t, i % 5);
                        let state = if i % 2 == 0 {
                            ConnectionState::Connected
                        } else {
                            ConnectionState::Established
                        };
                        registry.report_connection_fact(fact(socket(), &id, state));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("reporter panicked");
        }

        let last = lists.events().pop().expect("no client list emitted");
        assert_eq!(last, registry.get_clients());
    }
}

#[tokio::test]
async fn test_update_manifest() {
    let registry = registry();
    let id = registry
        .report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connected))
        .unwrap();

    assert!(registry.update_manifest(&id, ClientManifest::named("Pad")));
    assert!(!registry.update_manifest(&id, ClientManifest::named("Pad")));
    assert!(!registry.update_manifest("nope", ClientManifest::named("Pad")));
    assert_eq!(registry.get_client(&id).unwrap().display_name(), "Pad");
}

#[tokio::test]
async fn test_terminal_fact_for_unknown_endpoint_ignored() {
    let registry = registry();
    let id = registry.report_connection_fact(fact(usb(), "ghost", ConnectionState::Disconnected));
    assert!(id.is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_remove_provider_deactivates_identifiers() {
    let registry = registry();
    let id = registry
        .report_connection_fact(named_fact(usb(), "serial-1", ConnectionState::Connected, "Pad"))
        .unwrap();
    registry.report_connection_fact(named_fact(
        socket(),
        "conn-1",
        ConnectionState::Connected,
        "Pad",
    ));

    registry.remove_provider(&ProviderKind::network_socket());
    let client = registry.get_client(&id).unwrap();
    assert_eq!(client.primary_provider, Some(usb()));
    assert!(!client.identifiers[&socket()].active);
}

// ============================================================================
// Grace period
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reactivation_within_grace_keeps_client() {
    let registry = registry();
    let updates: Collector<ClientUpdate> = Collector::new();
    let _sub = registry.on_connection_fact(updates.listener());

    let id = registry
        .report_connection_fact(named_fact(
            usb(),
            "serial-1",
            ConnectionState::Connected,
            "CarThing-1",
        ))
        .unwrap();
    registry.report_connection_fact(fact(usb(), "serial-1", ConnectionState::Disconnected));
    assert!(registry.is_evicting(&id));

    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;

    let again = registry
        .report_connection_fact(named_fact(
            usb(),
            "serial-9",
            ConnectionState::Connected,
            "CarThing-1",
        ))
        .unwrap();
    assert_eq!(again, id);
    assert!(!registry.is_evicting(&id));

    tokio::time::advance(Duration::from_secs(5)).await;
    settle().await;

    assert_eq!(registry.len(), 1);
    assert!(registry.get_client(&id).unwrap().is_active());
    assert!(updates
        .events()
        .iter()
        .all(|u| u.change != ClientChange::Removed));
}

#[tokio::test(start_paused = true)]
async fn test_eviction_after_grace_period() {
    let registry = registry();
    let updates: Collector<ClientUpdate> = Collector::new();
    let _sub = registry.on_connection_fact(updates.listener());

    let id = registry
        .report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connected))
        .unwrap();
    registry.report_connection_fact(fact(socket(), "conn-1", ConnectionState::Disconnected));

    tokio::time::advance(Duration::from_millis(4_900)).await;
    settle().await;
    assert!(registry.get_client(&id).is_some());

    tokio::time::advance(Duration::from_millis(200)).await;
    settle().await;
    assert!(registry.get_client(&id).is_none());
    assert!(registry.client_for_provider(&socket(), "conn-1").is_none());

    let removed: Vec<ClientUpdate> = updates
        .events()
        .into_iter()
        .filter(|u| u.change == ClientChange::Removed)
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].client_id, id);
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_is_configurable() {
    let registry = ClientRegistry::new(RegistryConfig {
        grace_period: Duration::from_secs(1),
        ..Default::default()
    });
    let id = registry
        .report_connection_fact(fact(socket(), "conn-1", ConnectionState::Connected))
        .unwrap();
    registry.report_connection_fact(fact(socket(), "conn-1", ConnectionState::Disconnected));

    tokio::time::advance(Duration::from_millis(1_100)).await;
    settle().await;
    assert!(registry.get_client(&id).is_none());
}
