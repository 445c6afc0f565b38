pub mod backend;
pub mod codec;
pub mod frontend;
pub mod messages;

pub use codec::FormatCode;
pub use messages::{
    BackendMessage, CloseTarget, DescribeTarget, ErrorFields, FrontendMessage,
    RowDescriptionField, TransactionState,
};

#[cfg(test)]
mod tests;
