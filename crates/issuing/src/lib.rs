//! Issuing domain module.
//!
//! Exit vouchers: internal requests to withdraw stock for a workshop. A voucher
//! only affects stock when it is validated, which runs FIFO allocation for
//! every line.

pub mod voucher;

pub use voucher::{
    ExitVoucher, ExitVoucherLine, ExitVoucherStatus, ExitVoucherUpdate, Issue, NewExitVoucher,
};
