use tn3270r::protocol_common::{
    build_negotiation, build_subnegotiation, TelnetCommand, TelnetEvent, TelnetFramer, TelnetOption,
};
use tn3270r::telnet_negotiation::{TelnetNegotiator, Tn3270eState};

/// Feed raw host bytes through a framer and the negotiator, collecting the answers
fn answer(negotiator: &mut TelnetNegotiator, framer: &mut TelnetFramer, bytes: &[u8]) -> Vec<u8> {
    framer
        .feed(bytes)
        .iter()
        .filter(|event| !matches!(event, TelnetEvent::Record(_)))
        .flat_map(|event| negotiator.handle_event(event))
        .collect()
}

#[test]
fn test_tn3270_negotiation_from_raw_bytes() {
    let mut negotiator = TelnetNegotiator::new(4);
    let mut framer = TelnetFramer::new();

    // DO TTYPE, SB TTYPE SEND SE
    let response = answer(&mut negotiator, &mut framer, &[255, 253, 24, 255, 250, 24, 1, 255, 240]);
    let mut expected = build_negotiation(TelnetCommand::WILL, TelnetOption::TerminalType as u8);
    expected.extend(build_subnegotiation(TelnetOption::TerminalType as u8, b"\0IBM-3278-4"));
    assert_eq!(response, expected);
    assert!(!negotiator.is_negotiation_complete());

    // DO EOR, WILL EOR, DO BINARY, WILL BINARY split across reads
    let rest = [255, 253, 25, 255, 251, 25, 255, 253, 0, 255, 251, 0];
    let mut response = answer(&mut negotiator, &mut framer, &rest[..4]);
    response.extend(answer(&mut negotiator, &mut framer, &rest[4..]));
    assert_eq!(response, vec![255, 251, 25, 255, 253, 25, 255, 251, 0, 255, 253, 0]);
    assert!(negotiator.is_negotiation_complete());
    assert!(negotiator.is_option_active(TelnetOption::Binary));
    assert!(!negotiator.is_tn3270e_active());
}

#[test]
fn test_repeated_requests_are_not_answered_twice() {
    let mut negotiator = TelnetNegotiator::new(2);
    let mut framer = TelnetFramer::new();

    assert_eq!(answer(&mut negotiator, &mut framer, &[255, 253, 0]), vec![255, 251, 0]);
    assert!(answer(&mut negotiator, &mut framer, &[255, 253, 0]).is_empty());
}

#[test]
fn test_unknown_and_disabled_options_refused() {
    let mut negotiator = TelnetNegotiator::new(2);
    let mut framer = TelnetFramer::new();

    // DO NAWS, WILL ECHO, DO TN3270E with TN3270E disabled
    let response = answer(&mut negotiator, &mut framer, &[255, 253, 31, 255, 251, 1, 255, 253, 40]);
    assert_eq!(response, vec![255, 252, 31, 255, 254, 1, 255, 252, 40]);
    assert_eq!(negotiator.tn3270e_state(), &Tn3270eState::Inactive);
}

#[test]
fn test_tn3270e_with_host_function_request() {
    let mut negotiator = TelnetNegotiator::new(2).with_tn3270e(true, None);
    let mut framer = TelnetFramer::new();
    let tn3270e = TelnetOption::Tn3270e as u8;

    assert_eq!(answer(&mut negotiator, &mut framer, &[255, 253, 40]), vec![255, 251, 40]);

    let mut host = build_subnegotiation(tn3270e, &[8, 2]);
    let response = answer(&mut negotiator, &mut framer, &host);
    let mut request = vec![2, 7];
    request.extend_from_slice(b"IBM-3278-2-E");
    assert_eq!(response, build_subnegotiation(tn3270e, &request));

    // DEVICE-TYPE IS without CONNECT, then the host proposes functions first
    let mut bound = vec![2, 4];
    bound.extend_from_slice(b"IBM-3278-2-E");
    host = build_subnegotiation(tn3270e, &bound);
    host.extend(build_subnegotiation(tn3270e, &[3, 7, 2]));
    let response = answer(&mut negotiator, &mut framer, &host);

    let mut expected = build_subnegotiation(tn3270e, &[3, 7]);
    expected.extend(build_subnegotiation(tn3270e, &[3, 4, 2]));
    assert_eq!(response, expected);
    assert_eq!(negotiator.tn3270e_state(), &Tn3270eState::Active { functions: vec![2] });
    assert_eq!(negotiator.bound_device_type(), Some("IBM-3278-2-E"));
    assert_eq!(negotiator.bound_lu(), None);
    assert!(negotiator.is_negotiation_complete());
}
