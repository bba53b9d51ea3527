//! Integration tests for plclink-common library.

use serde_json::json;
use plclink_common::{
    ChangeEvent, Command, CommandMessage, CommandReply, CommandResult, ConnectionState,
    EventSource, Format, KeyExprBuilder, Signal, SignalDef, SignalKind, SignalValue, StatusEvent,
    decode, decode_auto, encode, parse_signal_key,
};

#[test]
fn test_change_event_workflow() {
    let signal = Signal::from_def(
        &SignalDef::new("temp", 10, SignalKind::HoldingRegister).with_display_name("Oven temp"),
    )
    .expect("valid definition");

    let event = ChangeEvent::for_signal(&signal, SignalValue::Word(75), 1_000, EventSource::Poll);

    // Encode as JSON, as published by default
    let json_bytes = encode(&event, Format::Json).expect("JSON encode failed");
    let wire: serde_json::Value = serde_json::from_slice(&json_bytes).unwrap();
    assert_eq!(wire["name"], json!("temp"));
    assert_eq!(wire["display_name"], json!("Oven temp"));
    assert_eq!(wire["value"], json!(75));
    assert_eq!(wire["source"], json!("poll"));

    // A subscriber decoding CBOR gets the same event back
    let cbor_bytes = encode(&event, Format::Cbor).expect("CBOR encode failed");
    let decoded: ChangeEvent = decode_auto(&cbor_bytes).expect("Auto decode failed");
    assert_eq!(decoded, event);
}

#[test]
fn test_command_from_cbor() {
    let msg = CommandMessage::new(Command::WriteSignal {
        signal: "lamp".to_string(),
        value: json!(true),
    })
    .with_id("req-42");

    let bytes = encode(&msg, Format::Cbor).unwrap();
    let decoded: CommandMessage = decode_auto(&bytes).unwrap();

    assert_eq!(decoded.id.as_deref(), Some("req-42"));
    match decoded.command {
        Command::WriteSignal { signal, value } => {
            assert_eq!(signal, "lamp");
            assert_eq!(
                SignalValue::coerce(SignalKind::DigitalOutputCoil, &value).unwrap(),
                SignalValue::Bool(true)
            );
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_status_reply_shape() {
    let status = StatusEvent {
        connected: false,
        signal_count: 12,
        timestamp: 99,
        connection: "plc01".to_string(),
        state: ConnectionState::Error,
        last_poll: Some(42),
    };

    let reply = CommandReply::success(CommandResult::Status(status)).with_id(Some("s".into()));
    let bytes = encode(&reply, Format::Json).unwrap();
    let wire: serde_json::Value = decode(&bytes, Format::Json).unwrap();

    assert_eq!(wire["ok"], json!(true));
    assert_eq!(wire["result"], json!("status"));
    assert_eq!(wire["connected"], json!(false));
    assert_eq!(wire["signal_count"], json!(12));
    assert_eq!(wire["state"], json!("error"));
    assert_eq!(wire["last_poll"], json!(42));
}

#[test]
fn test_key_expression_building_and_parsing() {
    let builder = KeyExprBuilder::new("line-2 plc");
    let key = builder.signal_key("CONN-001-SIG-0003");

    assert_eq!(key, "plclink/line-2_plc/signal/CONN-001-SIG-0003");

    let parsed = parse_signal_key("plclink", &key).expect("Parse failed");
    assert_eq!(parsed.connection, "line-2_plc");
    assert_eq!(parsed.signal, "CONN-001-SIG-0003");
}

#[test]
fn test_signal_catalog_from_json5() {
    let catalog = r#"[
        { name: "start", address: 0, kind: "Digital Input Contact" },
        { name: "motor", address: 1, kind: "coil", display_name: "Motor" },
        { name: "level", address: "4", kind: "Analog Input Register" },
        { name: "setpoint", modbus_address: 10, signal_type: "Holding Register", value: 72 },
    ]"#;

    let defs: Vec<SignalDef> = json5::from_str(catalog).unwrap();
    let signals: Vec<Signal> = defs
        .iter()
        .map(Signal::from_def)
        .collect::<Result<_, _>>()
        .unwrap();

    let kinds: Vec<SignalKind> = signals.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            SignalKind::DigitalInputContact,
            SignalKind::DigitalOutputCoil,
            SignalKind::AnalogInputRegister,
            SignalKind::HoldingRegister,
        ]
    );
    assert_eq!(signals[2].address, 4);
    assert_eq!(signals[3].value, Some(SignalValue::Word(72)));
}
