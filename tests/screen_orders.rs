//! Screen order processing
//!
//! 1. The field list always partitions the buffer exactly once
//! 2. Orders whose target lies before the current address wrap past 0
//! 3. The same orders always build the same fields
//! 4. A screen rebuilt from its own Erase/Write looks the same

use proptest::prelude::*;
use tn3270r::lib3270::{
    AddressRange, BufferAddress, CommandCode, Field, FieldAttributes, Inbound3270Message, Order, Screen,
    ScreenSize, WriteControlCharacter,
};

const SIZE: usize = 20;

fn at(v: usize) -> BufferAddress {
    BufferAddress::wrapping(v, SIZE)
}

fn ten_by_two() -> Screen {
    Screen::with_size(ScreenSize::new(2, 10))
}

fn write(orders: Vec<Order>) -> Inbound3270Message {
    Inbound3270Message::new(CommandCode::Write, Some(WriteControlCharacter::restore()), orders)
}

#[test]
fn test_repeat_to_address_before_current_wraps() {
    let mut screen = ten_by_two();
    // EW restore; SBA 0; RA to 19 'x'; SBA 0; SF prot; SBA 19; SF prot
    let bytes = [
        0xF5, 0xC2, 0x11, 0x40, 0x40, 0x3C, 0x40, 0xD3, 0xA7, 0x11, 0x40, 0x40, 0x1D, 0x60, 0x11, 0x40, 0xD3,
        0x1D, 0x60,
    ];
    screen.process_datastream(&bytes).unwrap();

    assert_eq!(
        screen.fields(),
        &[
            Field::start_of_field(at(0), FieldAttributes::protected()),
            Field::Text { range: AddressRange::of(1, 18, SIZE), text: vec!['x'; 18] },
            Field::start_of_field(at(19), FieldAttributes::protected()),
        ]
    );
    let fields = screen.logical_fields();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].text(), "x".repeat(18));
    assert_eq!(fields[1].attribute_address, Some(at(19)));
    assert!(fields[1].contents.is_empty());
}

#[test]
fn test_text_run_crossing_address_zero() {
    let mut screen = ten_by_two();
    screen
        .process_message(&write(vec![
            Order::SetBufferAddress(at(17)),
            Order::Text("ABCDEF".chars().collect()),
        ]))
        .unwrap();

    assert!(screen.is_partitioned());
    assert_eq!(screen.text(), "DEF       \n       ABC");
}

#[test]
fn test_erase_unprotected_to_address_wraps() {
    let mut screen = ten_by_two();
    screen
        .process_message(&write(vec![
            Order::SetBufferAddress(at(15)),
            Order::StartField(FieldAttributes::unprotected()),
            Order::RepeatToAddress { ch: 'Z', target: at(15) },
        ]))
        .unwrap();
    assert_eq!(screen.logical_fields()[0].text(), "Z".repeat(19));

    // Null from 18 round to 3
    screen
        .process_message(&write(vec![
            Order::SetBufferAddress(at(18)),
            Order::EraseUnprotectedToAddress(at(4)),
        ]))
        .unwrap();
    let text: String = screen.logical_fields()[0].contents.iter().map(|&c| if c == '\0' { '.' } else { c }).collect();
    // Content starts at 16
    assert_eq!(text, "ZZ......ZZZZZZZZZZZ");
}

#[test]
fn test_start_field_splits_text() {
    let mut screen = ten_by_two();
    screen
        .process_message(&write(vec![Order::Text("HELLOWORLD".chars().collect())]))
        .unwrap();
    screen
        .process_message(&write(vec![
            Order::SetBufferAddress(at(5)),
            Order::StartField(FieldAttributes::protected()),
        ]))
        .unwrap();

    assert_eq!(screen.fields()[0], Field::text(at(0), "HELLO".chars().collect::<Vec<_>>()));
    assert!(screen.fields()[1].is_start_of_field());
    assert_eq!(screen.fields()[2].contents()[..4], ['O', 'R', 'L', 'D']);
    assert!(screen.is_partitioned());
}

#[test]
fn test_erase_write_replay_of_wrapping_screen() {
    let mut screen = ten_by_two();
    screen
        .process_message(&write(vec![
            Order::SetBufferAddress(at(16)),
            Order::StartField(FieldAttributes::protected()),
            Order::Text("WRAP".chars().collect()),
            Order::StartField(FieldAttributes::unprotected()),
            Order::InsertCursor,
            Order::Text("in".chars().collect()),
        ]))
        .unwrap();

    let mut copy = ten_by_two();
    copy.process_message(&screen.to_erase_write()).unwrap();
    assert_eq!(copy.text(), screen.text());
    assert_eq!(copy.logical_fields(), screen.logical_fields());
    assert_eq!(copy.cursor(), screen.cursor());
}

fn order_strategy(size: usize) -> impl Strategy<Value = Order> {
    let addr = (0..size).prop_map(move |v| BufferAddress::wrapping(v, size));
    prop_oneof![
        addr.clone().prop_map(Order::SetBufferAddress),
        any::<bool>().prop_map(|protected| Order::StartField(if protected {
            FieldAttributes::protected()
        } else {
            FieldAttributes::unprotected()
        })),
        proptest::collection::vec(prop::char::range('A', 'Z'), 1..=size + 3).prop_map(Order::Text),
        (prop::char::range('a', 'z'), addr.clone()).prop_map(|(ch, target)| Order::RepeatToAddress { ch, target }),
        addr.prop_map(Order::EraseUnprotectedToAddress),
        Just(Order::InsertCursor),
    ]
}

fn screen_and_orders() -> impl Strategy<Value = (ScreenSize, Vec<Vec<Order>>)> {
    (1usize..=3, 1usize..=12).prop_flat_map(|(rows, columns)| {
        let size = ScreenSize::new(rows, columns);
        (
            Just(size),
            proptest::collection::vec(proptest::collection::vec(order_strategy(size.buffer_size()), 0..12), 1..5),
        )
    })
}

proptest! {
    #[test]
    fn fields_always_partition_the_buffer((size, writes) in screen_and_orders()) {
        let mut screen = Screen::with_size(size);
        for orders in writes {
            screen.process_message(&write(orders)).unwrap();

            prop_assert!(screen.is_partitioned(), "fields {:?}", screen.fields());
            let covered: usize = screen.fields().iter().map(Field::len).sum();
            prop_assert_eq!(covered, size.buffer_size());
            prop_assert_eq!(screen.text().chars().filter(|&c| c != '\n').count(), size.buffer_size());
        }
    }

    #[test]
    fn same_orders_give_same_fields((size, writes) in screen_and_orders()) {
        let mut first = Screen::with_size(size);
        let mut second = Screen::with_size(size);
        for orders in writes {
            let message = write(orders);
            first.process_message(&message).unwrap();
            second.process_message(&message).unwrap();
        }
        prop_assert_eq!(first.fields(), second.fields());
        prop_assert_eq!(first.cursor(), second.cursor());
    }

    #[test]
    fn replayed_screen_matches((size, writes) in screen_and_orders()) {
        let mut screen = Screen::with_size(size);
        for orders in writes {
            screen.process_message(&write(orders)).unwrap();
        }
        let mut copy = Screen::with_size(size);
        copy.process_message(&screen.to_erase_write()).unwrap();
        prop_assert_eq!(copy.text(), screen.text());
        prop_assert_eq!(copy.logical_fields(), screen.logical_fields());
    }
}
