//! Integration tests for the instrument hub
//!
//! These tests verify end-to-end behavior across the workspace:
//! - Registration, sharing and type conflicts keyed by resolved port
//! - Bridge-routed instruments sharing one Prologix adapter
//! - Fault isolation while polling many instruments
//! - Teardown and event emission
//!
//! No hardware is needed; everything runs against `lab-sim`.

use std::sync::Arc;

use lab_hub::{
    DriverRegistry, GenericChannel, GenericDriver, GenericDriverConfig, HubConfig, HubError,
    HubEvent, InstrumentHub, PortParam, Registration,
};
use lab_sim::{MockDevice, MockOpener, VirtualPrologix, VirtualPrologixHandle};
use lab_transport::{PrologixBridge, ResourceId, TransportKind};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    fn generic(name: &str, transport: TransportKind, channels: &[(&str, &str)]) -> GenericDriver {
        GenericDriver::new(GenericDriverConfig {
            name: name.to_string(),
            transport,
            init_commands: Vec::new(),
            channels: channels
                .iter()
                .map(|(channel, query)| GenericChannel {
                    name: channel.to_string(),
                    unit: String::new(),
                    query: query.to_string(),
                })
                .collect(),
        })
    }

    /// Built-in drivers plus two bridge types and one serial type
    pub fn registry() -> DriverRegistry {
        let mut registry = DriverRegistry::with_builtin();
        registry.register(generic(
            "LS340",
            TransportKind::Bridge,
            &[("A", "KRDG? A"), ("B", "KRDG? B")],
        ));
        registry.register(generic("OTHER", TransportKind::Bridge, &[("X", "X?")]));
        registry.register(generic("PARO1000", TransportKind::Serial, &[("PRESSURE", "P3")]));
        registry
    }

    /// Adapter with an LS340 at 12 and a second controller at 5
    pub fn adapter() -> VirtualPrologix {
        VirtualPrologix::new()
            .with_device(12, "LSCI,MODEL340,0,061407")
            .with_reply(12, "KRDG? A", "+077.350")
            .with_reply(12, "KRDG? B", "+004.200")
            .with_device(5, "LSCI,MODEL340,0,070001")
            .with_reply(5, "KRDG? A", "+300.000")
    }

    /// Hub with a virtual bridge and a mock opener holding `PARO1000` at COM4
    pub fn hub() -> (InstrumentHub, VirtualPrologixHandle, MockOpener) {
        let adapter = adapter();
        let handle = adapter.handle();
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

        let opener = MockOpener::new()
            .with_device("COM4", MockDevice::with_idn("Paroscientific").reply("P3", "14.696"))
            .with_device("TIME", MockDevice::new())
            .with_device("DICE", MockDevice::new());

        let hub = InstrumentHub::new(HubConfig::default(), registry())
            .with_opener(Arc::new(opener.clone()))
            .with_bridge(bridge);
        (hub, handle, opener)
    }

    /// Hub in simulation mode without any bridge
    pub fn debug_hub() -> InstrumentHub {
        let config = HubConfig {
            debug: true,
            ..HubConfig::default()
        };
        InstrumentHub::new(config, registry()).with_opener(Arc::new(MockOpener::new()))
    }

    pub fn pair(port: &str, parameter: &str) -> PortParam {
        PortParam::new(ResourceId::new(port), parameter)
    }

    /// Drain every event currently queued on a receiver
    pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<HubEvent>) -> Vec<HubEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

// ============================================================================
// Registration Tests
// ============================================================================

mod registration_tests {
    use super::*;

    #[test]
    fn test_type_conflict_is_rejected() {
        let (mut hub, _, _) = helpers::hub();

        let first = hub.connect_instrument("LS340", "GPIB0::12", "A").unwrap();
        let second = hub.connect_instrument("OTHER", "GPIB0::12", "B").unwrap();

        assert_eq!(first, Registration::Connected(ResourceId::gpib(12)));
        assert_eq!(
            second,
            Registration::Conflict {
                port: ResourceId::gpib(12),
                existing: "LS340".to_string(),
            }
        );
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.instrument(&ResourceId::gpib(12)).map(|i| i.id()), Some("LS340"));
        assert_eq!(
            hub.pairs(),
            &[helpers::pair("GPIB0::12", "A"), PortParam::placeholder()]
        );
    }

    #[test]
    fn test_same_type_shares_connection() {
        let (mut hub, handle, _) = helpers::hub();

        hub.connect_instrument("LS340", "GPIB0::12", "A").unwrap();
        let second = hub.connect_instrument("LS340", "GPIB0::12", "B").unwrap();

        assert_eq!(second, Registration::Shared(ResourceId::gpib(12)));
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.instrument_count(), 2);
        assert_eq!(hub.poll(), vec![Some(77.35), Some(4.2)]);
        assert_eq!(handle.lines().iter().filter(|l| *l == "++addr 12").count(), 3);
    }

    #[test]
    fn test_resolved_port_is_the_registry_key() {
        let (mut hub, _, _) = helpers::hub();

        hub.connect_instrument("LS340", "GPIB0::12", "A").unwrap();
        let again = hub.connect_instrument("LS340", "GPIB0::12::INSTR", "B").unwrap();
        let clash = hub.connect_instrument("OTHER", "GPIB0::12::INSTR", "X").unwrap();

        assert_eq!(again, Registration::Shared(ResourceId::gpib(12)));
        assert!(matches!(clash, Registration::Conflict { .. }));
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.pairs()[1], helpers::pair("GPIB0::12", "B"));
    }

    #[test]
    fn test_open_failure_appends_placeholder() {
        let (mut hub, _, _) = helpers::hub();

        let result = hub.connect_instrument("PARO1000", "COM9", "PRESSURE");

        assert!(matches!(result, Err(HubError::Transport(_))));
        assert_eq!(hub.pairs(), &[PortParam::placeholder()]);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_malformed_bridge_address() {
        let (mut hub, _, _) = helpers::hub();

        let result = hub.connect_instrument("LS340", "GPIB0::31", "A");

        assert!(matches!(result, Err(HubError::Transport(_))));
        assert_eq!(hub.instrument_count(), 1);
    }

    #[test]
    fn test_connect_hub_continues_after_failures() {
        let (mut hub, _, _) = helpers::hub();

        let results = hub.connect_hub(
            &["LS340", "NOPE", "OTHER", "PARO1000", "NONE"],
            &["GPIB0::12", "COM1", "GPIB0::12", "COM4", ""],
            &["A", "x", "X", "PRESSURE", ""],
        );

        assert!(matches!(results[0], Ok(Registration::Connected(_))));
        assert!(matches!(results[1], Err(HubError::UnknownInstrument(_))));
        assert!(matches!(results[2], Ok(Registration::Conflict { .. })));
        assert!(matches!(results[3], Ok(Registration::Connected(_))));
        assert!(matches!(results[4], Ok(Registration::Placeholder)));
        assert_eq!(
            hub.pairs(),
            &[
                helpers::pair("GPIB0::12", "A"),
                PortParam::placeholder(),
                PortParam::placeholder(),
                helpers::pair("COM4", "PRESSURE"),
                PortParam::placeholder(),
            ]
        );
    }

    #[test]
    fn test_connect_hub_replaces_previous_registrations() {
        let (mut hub, _, opener) = helpers::hub();

        hub.connect_hub(&["PARO1000"], &["COM4"], &["PRESSURE"]);
        hub.connect_hub(&["PARO1000"], &["COM4"], &["PRESSURE"]);

        assert_eq!(hub.instrument_count(), 1);
        assert_eq!(opener.live_count(), 1);
        assert_eq!(opener.device("COM4").unwrap().open_count(), 2);
    }
}

// ============================================================================
// Bridge Tests
// ============================================================================

mod bridge_tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_instruments_share_one_bridge() {
        let (mut hub, handle, _) = helpers::hub();

        hub.connect_instrument("LS340", "GPIB0::12", "A").unwrap();
        hub.connect_instrument("LS340", "GPIB0::5", "A").unwrap();

        assert_eq!(hub.poll(), vec![Some(77.35), Some(300.0)]);

        let lines = handle.lines();
        let tail = &lines[lines.len() - 4..];
        assert_eq!(tail, ["++addr 12", "KRDG? A", "++addr 5", "KRDG? A"]);
    }

    #[test]
    fn test_concurrent_transactions_never_interleave() {
        let adapter = VirtualPrologix::new()
            .with_reply(3, "READ? 3", "three")
            .with_reply(7, "READ? 7", "seven")
            .with_reply(11, "READ? 11", "eleven");
        let handle = adapter.handle();
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

        let workers: Vec<_> = [(3u8, "three"), (7, "seven"), (11, "eleven")]
            .into_iter()
            .map(|(address, expected)| {
                let bridge = bridge.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let reply = bridge.transact(address, &format!("READ? {}", address));
                        assert_eq!(reply.unwrap(), expected);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let lines = handle.lines();
        for (i, line) in lines.iter().enumerate().filter(|(_, l)| l.starts_with("READ?")) {
            let address = line.trim_start_matches("READ? ");
            assert_eq!(lines[i - 1], format!("++addr {}", address));
        }
    }

    #[test]
    fn test_bus_scan_finds_answering_addresses() {
        let adapter = VirtualPrologix::new().with_device(2, "HP,34401A");
        let handle = adapter.handle();
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();
        let before = bridge.timeout();

        assert_eq!(bridge.discover_addresses(3).unwrap(), vec![ResourceId::gpib(2)]);
        assert_eq!(handle.idn_probes(), 4);
        assert_eq!(bridge.timeout(), before);
    }

    #[test]
    fn test_connectable_ports_include_bus_scan() {
        let (mut hub, _, _) = helpers::hub();

        let gpib: Vec<ResourceId> = hub
            .get_connectable_ports()
            .into_iter()
            .filter(ResourceId::is_gpib)
            .collect();

        assert_eq!(gpib.len(), 2);
        assert!(gpib.contains(&ResourceId::gpib(5)));
        assert!(gpib.contains(&ResourceId::gpib(12)));
    }

    #[test]
    fn test_external_bridge_survives_hub() {
        let adapter = helpers::adapter();
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();
        {
            let mut hub = InstrumentHub::new(HubConfig::default(), helpers::registry())
                .with_bridge(bridge.clone());
            hub.connect_instrument("LS340", "GPIB0::12", "A").unwrap();
        }
        assert!(bridge.is_open());
        assert_eq!(bridge.transact(12, "KRDG? A").unwrap(), "+077.350");
    }
}

// ============================================================================
// Polling Tests
// ============================================================================

mod polling_tests {
    use super::*;

    #[test]
    fn test_poll_follows_pair_order() {
        let (mut hub, _, _) = helpers::hub();
        hub.connect_hub(
            &["PARO1000", "", "LS340", "LS340"],
            &["COM4", "", "GPIB0::12", "GPIB0::12"],
            &["PRESSURE", "", "B", "A"],
        );

        assert_eq!(hub.poll(), vec![Some(14.696), None, Some(4.2), Some(77.35)]);
    }

    #[test]
    fn test_failing_instrument_does_not_abort_poll() {
        let (mut hub, _, opener) = helpers::hub();
        hub.connect_hub(
            &["PARO1000", "LS340"],
            &["COM4", "GPIB0::12"],
            &["PRESSURE", "A"],
        );
        let paro = opener.device("COM4").unwrap();

        paro.set_fail_writes(true);
        let values = hub.poll();
        assert!(values[0].is_some_and(f64::is_nan));
        assert_eq!(values[1], Some(77.35));

        paro.set_fail_writes(false);
        assert_eq!(hub.poll(), vec![Some(14.696), Some(77.35)]);
    }

    #[test]
    fn test_identify_all() {
        let (mut hub, _, _) = helpers::hub();
        hub.connect_hub(&["PARO1000", "LS340"], &["COM4", "GPIB0::12"], &["PRESSURE", "A"]);

        let ids = hub.identify_all();

        assert_eq!(
            ids,
            vec![
                (ResourceId::new("COM4"), "Paroscientific".to_string()),
                (ResourceId::gpib(12), "LSCI,MODEL340,0,061407".to_string()),
            ]
        );
    }

    #[test]
    fn test_measurements_are_per_instance() {
        let (mut hub, _, _) = helpers::hub();
        hub.connect_hub(
            &["LS340", "LS340"],
            &["GPIB0::12", "GPIB0::5"],
            &["A", "A"],
        );
        hub.poll();

        let a12 = hub.instrument(&ResourceId::gpib(12)).unwrap();
        let a5 = hub.instrument(&ResourceId::gpib(5)).unwrap();
        assert_eq!(a12.connection().last_measurement().get("A"), Some(&77.35));
        assert_eq!(a5.connection().last_measurement().get("A"), Some(&300.0));
    }
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_clean_up_on_empty_hub_twice() {
        let (mut hub, _, _) = helpers::hub();

        hub.clean_up();
        assert_eq!(hub.connection_count(), 0);
        hub.clean_up();
        assert_eq!(hub.connection_count(), 0);
        assert!(hub.pairs().is_empty());
    }

    #[test]
    fn test_clean_up_closes_everything() {
        let (mut hub, _, opener) = helpers::hub();
        hub.connect_hub(
            &["PARO1000", "TIME", "DICE"],
            &["COM4", "", ""],
            &["PRESSURE", "dt", "Roll"],
        );
        assert_eq!(opener.live_count(), 3);

        hub.clean_up();

        assert_eq!(opener.live_count(), 0);
        assert_eq!(hub.instrument_count(), 0);
    }

    #[test]
    fn test_disconnect_keeps_positions() {
        let (mut hub, _, opener) = helpers::hub();
        hub.connect_hub(
            &["PARO1000", "TIME"],
            &["COM4", ""],
            &["PRESSURE", "dt"],
        );

        hub.disconnect(&ResourceId::new("COM4")).unwrap();

        assert_eq!(hub.pairs()[0], PortParam::placeholder());
        assert_eq!(hub.pairs()[1], helpers::pair("TIME", "dt"));
        assert_eq!(opener.device("COM4").unwrap().live_count(), 0);
        assert!(matches!(
            hub.disconnect(&ResourceId::new("COM4")),
            Err(HubError::NotConnected(_))
        ));
    }

    #[test]
    fn test_reconnect_does_not_leak() {
        let (mut hub, _, opener) = helpers::hub();
        let com4 = ResourceId::new("COM4");
        hub.connect_instrument("PARO1000", "COM4", "PRESSURE").unwrap();

        let paro = hub.instrument_mut(&com4).unwrap();
        paro.connect(&com4).unwrap();
        paro.connect(&com4).unwrap();

        assert_eq!(opener.device("COM4").unwrap().live_count(), 1);
        hub.clean_up();
        assert_eq!(opener.live_count(), 0);
    }
}

// ============================================================================
// Event Tests
// ============================================================================

mod event_tests {
    use super::*;

    #[test]
    fn test_connect_emits_connected_and_list_changed() {
        let (mut hub, _, _) = helpers::hub();
        let mut rx = hub.subscribe();

        hub.connect_instrument("LS340", "GPIB0::12", "A").unwrap();

        let events = helpers::drain(&mut rx);
        assert_eq!(
            events,
            vec![
                HubEvent::InstrumentConnected {
                    port: ResourceId::gpib(12),
                    instrument: "LS340".to_string(),
                    parameter: "A".to_string(),
                },
                HubEvent::ListChanged { pairs: 1 },
            ]
        );
    }

    #[test]
    fn test_conflict_does_not_emit_list_changed() {
        let (mut hub, _, _) = helpers::hub();
        hub.connect_instrument("LS340", "GPIB0::12", "A").unwrap();
        let mut rx = hub.subscribe();

        hub.connect_instrument("OTHER", "GPIB0::12", "B").unwrap();

        let events = helpers::drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], HubEvent::RegistrationConflict { .. }));
    }

    #[test]
    fn test_connect_hub_emits_one_list_changed() {
        let (mut hub, _, _) = helpers::hub();
        let mut rx = hub.subscribe();

        hub.connect_hub(
            &["LS340", "LS340", "PARO1000"],
            &["GPIB0::12", "GPIB0::12", "COM4"],
            &["A", "B", "PRESSURE"],
        );

        let events = helpers::drain(&mut rx);
        assert_eq!(events.first(), Some(&HubEvent::Cleared));
        let list_changes: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, HubEvent::ListChanged { .. }))
            .collect();
        assert_eq!(list_changes, vec![&HubEvent::ListChanged { pairs: 3 }]);
    }
}

// ============================================================================
// Debug Mode Tests
// ============================================================================

mod debug_mode_tests {
    use super::*;

    #[test]
    fn test_debug_hub_needs_no_hardware() {
        let mut hub = helpers::debug_hub();

        hub.connect_hub(
            &["TIME", "DICE", "TIME", "LS340"],
            &["", "COM14", "", "GPIB0::12"],
            &["Time", "Roll", "dt", "A"],
        );

        assert_eq!(hub.connection_count(), 3);
        assert_eq!(
            hub.pairs(),
            &[
                helpers::pair("TIME", "Time"),
                helpers::pair("COM14", "Roll"),
                helpers::pair("TIME", "dt"),
                helpers::pair("GPIB0::12", "A"),
            ]
        );

        let values = hub.poll();
        assert!(values[1].is_some_and(|roll| (1.0..=6.0).contains(&roll)));
        assert!(values[3].is_some_and(f64::is_nan));

        let ls340 = hub.instrument_mut(&ResourceId::gpib(12)).unwrap();
        assert_eq!(ls340.identify(), "LS340");
    }

    #[test]
    fn test_debug_port_list() {
        let mut hub = helpers::debug_hub();
        let ports = hub.get_connectable_ports();

        assert_eq!(ports.len(), 30);
        assert!(ports.contains(&ResourceId::gpib(0)));
        assert!(ports.contains(&ResourceId::gpib(29)));
    }

    #[test]
    fn test_set_debug_applies_to_new_connections_only() {
        let (mut hub, _, opener) = helpers::hub();
        hub.connect_instrument("PARO1000", "COM4", "PRESSURE").unwrap();

        hub.set_debug(true);
        hub.connect_instrument("DICE", "COM99", "Roll").unwrap();

        let com4 = ResourceId::new("COM4");
        assert!(!hub.instrument(&com4).unwrap().connection().is_debug());
        assert!(hub
            .instrument(&ResourceId::new("COM99"))
            .unwrap()
            .connection()
            .is_debug());
        assert_eq!(opener.opened().len(), 1);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn instrument_name() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("TIME"), Just("DICE"), Just("NONE"), Just(""), Just("NOPE")]
    }

    fn port() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just(""), Just("COM1"), Just("COM2"), Just("GPIB0::3")]
    }

    proptest! {
        #[test]
        fn every_registration_appends_one_pair(
            lines in prop::collection::vec((instrument_name(), port()), 0..20)
        ) {
            let mut hub = helpers::debug_hub();
            for (i, (name, port)) in lines.iter().enumerate() {
                let _ = hub.connect_instrument(name, *port, &format!("p{}", i));
                prop_assert_eq!(hub.instrument_count(), i + 1);
            }

            for (i, pair) in hub.pairs().iter().enumerate() {
                if let Some(parameter) = &pair.parameter {
                    prop_assert_eq!(parameter, &format!("p{}", i));
                }
            }
            prop_assert!(hub.connection_count() <= hub.instrument_count());
        }

        #[test]
        fn remove_last_pops_in_reverse_order(
            lines in prop::collection::vec((instrument_name(), port()), 1..12)
        ) {
            let mut hub = helpers::debug_hub();
            for (i, (name, port)) in lines.iter().enumerate() {
                let _ = hub.connect_instrument(name, *port, &format!("p{}", i));
            }
            let expected: Vec<PortParam> = hub.pairs().iter().rev().cloned().collect();

            let mut removed = Vec::new();
            while let Some(pair) = hub.remove_last() {
                removed.push(pair);
            }

            prop_assert_eq!(removed, expected);
            prop_assert_eq!(hub.connection_count(), 0);
        }

        #[test]
        fn bus_scan_probes_every_address_once(
            max_address in 0u8..=30,
            present in prop::collection::btree_set(0u8..=30, 0..6)
        ) {
            let adapter = present
                .iter()
                .fold(VirtualPrologix::new(), |a, addr| a.with_device(*addr, "DEV"));
            let handle = adapter.handle();
            let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

            let found = bridge.discover_addresses(max_address).unwrap();

            let expected: Vec<ResourceId> = present
                .iter()
                .filter(|a| **a <= max_address)
                .map(|a| ResourceId::gpib(*a))
                .collect();
            prop_assert_eq!(found, expected);
            prop_assert_eq!(handle.idn_probes(), usize::from(max_address) + 1);
        }
    }
}
