use crate::header::FieldType;

/// One fixed-width wire primitive. Sealed over the ten numeric types; bools
/// are bit-packed and handled separately. The `funty::Numeric` supertrait
/// carries Copy/Default/PartialEq/Debug and the byte-conversion surface, so
/// list views and scalar accessors can be written once and monomorphised
/// per type.
pub trait Prim:
    funty::Numeric + Default + Copy + PartialEq + std::fmt::Debug + sealed::Sealed
{
    /// Tag of the scalar form.
    const SCALAR_TY: FieldType;
    /// Tag of the list form.
    const LIST_TY: FieldType;
    /// Encoded width in bytes.
    const WIDTH: usize;
    /// True when the scalar value fits the 40-bit header payload.
    const PACKED: bool;

    /// Write the little-endian encoding into `out[..WIDTH]`.
    fn write_wire(self, out: &mut [u8]);
    /// Read the little-endian encoding from `bytes[..WIDTH]`.
    fn read_wire(bytes: &[u8]) -> Self;
    fn to_final40(self) -> u64;
    fn from_final40(v: u64) -> Self;
    /// Wire-value equality: NaN equals NaN for the float types, everything
    /// else is plain equality.
    fn same(a: Self, b: Self) -> bool;

    fn is_zero(self) -> bool {
        Self::same(self, Self::default())
    }

    fn wire_bytes(self) -> Vec<u8> {
        let mut out = vec![0u8; Self::WIDTH];
        self.write_wire(&mut out);
        out
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

macro_rules! impl_prim_int {
    ($t:ty, $w:expr, $sc:ident, $ls:ident, $packed:expr) => {
        impl Prim for $t {
            const SCALAR_TY: FieldType = FieldType::$sc;
            const LIST_TY: FieldType = FieldType::$ls;
            const WIDTH: usize = $w;
            const PACKED: bool = $packed;

            fn write_wire(self, out: &mut [u8]) {
                out[..$w].copy_from_slice(&self.to_le_bytes());
            }

            fn read_wire(bytes: &[u8]) -> Self {
                let mut b = [0u8; $w];
                b.copy_from_slice(&bytes[..$w]);
                <$t>::from_le_bytes(b)
            }

            fn to_final40(self) -> u64 {
                let mut b = [0u8; 8];
                b[..$w].copy_from_slice(&self.to_le_bytes());
                u64::from_le_bytes(b)
            }

            fn from_final40(v: u64) -> Self {
                Self::read_wire(&v.to_le_bytes())
            }

            fn same(a: Self, b: Self) -> bool {
                a == b
            }
        }
    };
}

macro_rules! impl_prim_float {
    ($t:ty, $w:expr, $sc:ident, $ls:ident, $packed:expr) => {
        impl Prim for $t {
            const SCALAR_TY: FieldType = FieldType::$sc;
            const LIST_TY: FieldType = FieldType::$ls;
            const WIDTH: usize = $w;
            const PACKED: bool = $packed;

            fn write_wire(self, out: &mut [u8]) {
                out[..$w].copy_from_slice(&self.to_le_bytes());
            }

            fn read_wire(bytes: &[u8]) -> Self {
                let mut b = [0u8; $w];
                b.copy_from_slice(&bytes[..$w]);
                <$t>::from_le_bytes(b)
            }

            fn to_final40(self) -> u64 {
                let mut b = [0u8; 8];
                b[..$w].copy_from_slice(&self.to_le_bytes());
                u64::from_le_bytes(b)
            }

            fn from_final40(v: u64) -> Self {
                Self::read_wire(&v.to_le_bytes())
            }

            fn same(a: Self, b: Self) -> bool {
                use ordered_float::OrderedFloat;
                OrderedFloat(a) == OrderedFloat(b)
            }
        }
    };
}

impl_prim_int!(i8, 1, Int8, ListInt8, true);
impl_prim_int!(i16, 2, Int16, ListInt16, true);
impl_prim_int!(i32, 4, Int32, ListInt32, true);
impl_prim_int!(i64, 8, Int64, ListInt64, false);
impl_prim_int!(u8, 1, Uint8, ListUint8, true);
impl_prim_int!(u16, 2, Uint16, ListUint16, true);
impl_prim_int!(u32, 4, Uint32, ListUint32, true);
impl_prim_int!(u64, 8, Uint64, ListUint64, false);
impl_prim_float!(f32, 4, Float32, ListFloat32, true);
impl_prim_float!(f64, 8, Float64, ListFloat64, false);
