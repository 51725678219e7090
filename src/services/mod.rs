mod shift;

pub use shift::{HttpRedeemer, Redeemer, Session};
