// Number types whose values may be reinterpreted from raw bytes.
pub trait Align1: bytemuck::Pod {}

impl Align1 for u8 {}
impl Align1 for u32 {}
impl Align1 for u64 {}
impl Align1 for f32 {}
impl Align1 for f64 {}

// Buffers of these types are at least 4 bytes aligned, so an `f32` payload
// that starts right after the 4 byte kind header can be cast in place.
pub trait Align4: Align1 {}

impl Align4 for u32 {}
impl Align4 for u64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
