// Primitive number types that can be viewed as plain bytes.
pub trait Align1: bytemuck::Pod {}

impl Align1 for u8 {}
impl Align1 for u32 {}
impl Align1 for i32 {}
impl Align1 for u64 {}
impl Align1 for i64 {}
impl Align1 for f32 {}
impl Align1 for f64 {}

// Receive buffers of these types start at a 4 byte boundary, so `f32` payloads
// can be borrowed straight out of them.
pub trait Align4: Align1 {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for u64 {}
impl Align4 for i64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
