/// Primitive number types aligned to at least 8 bytes.
///
/// Receiving into a buffer of these keeps every `f64` payload aligned once the
/// length prefix and the message header have been skipped.
pub trait Align8: bytemuck::Pod {}

impl Align8 for u64 {}
impl Align8 for i64 {}
impl Align8 for f64 {}
impl Align8 for u128 {}
impl Align8 for i128 {}
