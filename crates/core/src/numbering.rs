//! Human-readable document numbers.
//!
//! Numbers have the shape `<PREFIX>-<YYYYMMDD>-<NNNN>`, where `NNNN` is the
//! count of existing documents of that kind plus one, zero-padded to four
//! digits (wider once the count passes 9999). Uniqueness is enforced by the
//! store; two writers racing for the same number lose one commit to a conflict
//! and retry with a fresh count.

use chrono::NaiveDate;

pub const LOT_PREFIX: &str = "LOT";
pub const EXIT_VOUCHER_PREFIX: &str = "BS";
pub const ORDER_PREFIX: &str = "CMD";

/// Prefix of the movement reference written by exit voucher validation.
pub const EXIT_REFERENCE_PREFIX: &str = "EXIT";

pub fn sequential_number(prefix: &str, date: NaiveDate, existing: u64) -> String {
    format!("{prefix}-{}-{:04}", date.format("%Y%m%d"), existing + 1)
}

pub fn lot_number(date: NaiveDate, existing_lots: u64) -> String {
    sequential_number(LOT_PREFIX, date, existing_lots)
}

pub fn exit_voucher_number(date: NaiveDate, existing_vouchers: u64) -> String {
    sequential_number(EXIT_VOUCHER_PREFIX, date, existing_vouchers)
}

pub fn order_number(date: NaiveDate, existing_orders: u64) -> String {
    sequential_number(ORDER_PREFIX, date, existing_orders)
}

/// Reference stamped on every EXIT movement of a validated voucher.
pub fn exit_reference(voucher_number: &str) -> String {
    format!("{EXIT_REFERENCE_PREFIX}-{voucher_number}")
}
