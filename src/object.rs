//! The closed set of data-object kinds and the shape/type metadata the engine needs
//! about them.
//!
//! Concrete storage for images, tensors, arrays, and the rest is explicitly out of
//! scope: the engine never looks at pixels. What it *does* need, for
//! verification and overlap resolution, is each object's shape/type (carried as
//! [`ObjectShape`]) and, for sub-objects, a link back to whatever base object they
//! were carved out of (carried as [`OverlapRegion`]).

use crate::reference::{RefHandle, ReferenceHeader};
use std::sync::{Arc, RwLock};

/// The closed set of object kinds this engine tracks. `Context` itself is excluded from
/// [`crate::reference`]'s slot table (it is the root, never entered in its own table),
/// but the discriminant still exists so `validate` can reject a `Context` passed where
/// another kind is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Context,
    Graph,
    Node,
    Kernel,
    Parameter,
    MetaFormat,
    Target,
    Error,
    Import,
    Delay,
    Image,
    Tensor,
    Array,
    Lut,
    ObjectArray,
    Matrix,
    Convolution,
    Pyramid,
    Remap,
    Threshold,
    Scalar,
    Distribution,
    UserDataObject,
}

impl ObjectKind {
    /// Whether this kind denotes a data object (as opposed to a framework object like
    /// `Graph`/`Node`/`Kernel`/`Target`). Data objects are the ones that carry an
    /// [`ObjectShape`] and may require backing memory.
    pub fn is_data_object(&self) -> bool {
        !matches!(
            self,
            ObjectKind::Context
                | ObjectKind::Graph
                | ObjectKind::Node
                | ObjectKind::Kernel
                | ObjectKind::Parameter
                | ObjectKind::MetaFormat
                | ObjectKind::Target
                | ObjectKind::Error
        )
    }
}

/// Scalar element type, used by `Tensor`, `Array`, `Lut`, `Matrix`, `Scalar`, and
/// `Distribution` shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    Size,
}

/// Image pixel format. `Virt` is the "format not yet known" sentinel a virtual image
/// carries before verification specializes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Virt,
    U8,
    U16,
    S16,
    U32,
    S32,
    Rgb,
    Rgba,
    Nv12,
    Yuv4,
}

/// An axis-aligned rectangle on an image or pyramid level, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl Rectangle {
    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.start_x < other.end_x
            && other.start_x < self.end_x
            && self.start_y < other.end_y
            && other.start_y < self.end_y
    }
}

/// Per-kind shape/type metadata, as carried by a [`crate::meta::MetaFormat`] and
/// stored on every data object. Each variant enumerates exactly the fields that kind
/// needs to describe its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectShape {
    Image {
        width: u32,
        height: u32,
        format: ImageFormat,
    },
    Tensor {
        dims: Vec<usize>,
        data_type: ScalarType,
        fixed_point_position: i8,
    },
    Array {
        item_type: ScalarType,
        capacity: usize,
    },
    Lut {
        item_type: ScalarType,
        count: usize,
    },
    ObjectArray {
        item_kind: ObjectKind,
        num_items: usize,
    },
    Matrix {
        data_type: ScalarType,
        columns: usize,
        rows: usize,
    },
    Convolution {
        columns: usize,
        rows: usize,
        scale: u32,
    },
    Pyramid {
        levels: usize,
        scale: f32,
        format: ImageFormat,
        base_width: u32,
        base_height: u32,
    },
    Remap {
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
    },
    Threshold {
        data_type: ScalarType,
    },
    Scalar {
        data_type: ScalarType,
    },
    Distribution {
        bins: usize,
        offset: i32,
        range: u32,
    },
    UserDataObject {
        type_name: String,
        size: usize,
    },
}

impl ObjectShape {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectShape::Image { .. } => ObjectKind::Image,
            ObjectShape::Tensor { .. } => ObjectKind::Tensor,
            ObjectShape::Array { .. } => ObjectKind::Array,
            ObjectShape::Lut { .. } => ObjectKind::Lut,
            ObjectShape::ObjectArray { .. } => ObjectKind::ObjectArray,
            ObjectShape::Matrix { .. } => ObjectKind::Matrix,
            ObjectShape::Convolution { .. } => ObjectKind::Convolution,
            ObjectShape::Pyramid { .. } => ObjectKind::Pyramid,
            ObjectShape::Remap { .. } => ObjectKind::Remap,
            ObjectShape::Threshold { .. } => ObjectKind::Threshold,
            ObjectShape::Scalar { .. } => ObjectKind::Scalar,
            ObjectShape::Distribution { .. } => ObjectKind::Distribution,
            ObjectShape::UserDataObject { .. } => ObjectKind::UserDataObject,
        }
    }

    /// True if this shape is the "not yet specialized" sentinel for its kind: zero
    /// width/height, the `Virt` format, zero dims, zero capacity, and so on. The
    /// output-reconciliation phase of verification uses this to decide whether to
    /// *initialize* a virtual object from a kernel's written meta rather than compare
    /// against it field by field.
    pub fn is_unspecified(&self) -> bool {
        match self {
            ObjectShape::Image { width, height, format } => {
                *width == 0 && *height == 0 && *format == ImageFormat::Virt
            }
            ObjectShape::Tensor { dims, .. } => dims.is_empty(),
            ObjectShape::Array { capacity, .. } => *capacity == 0,
            ObjectShape::Lut { count, .. } => *count == 0,
            ObjectShape::ObjectArray { num_items, .. } => *num_items == 0,
            ObjectShape::Matrix { columns, rows, .. } => *columns == 0 && *rows == 0,
            ObjectShape::Convolution { columns, rows, .. } => *columns == 0 && *rows == 0,
            ObjectShape::Pyramid {
                levels,
                format,
                base_width,
                base_height,
                ..
            } => *levels == 0 || (*base_width == 0 && *base_height == 0 && *format == ImageFormat::Virt),
            ObjectShape::Remap { dst_width, dst_height, .. } => *dst_width == 0 && *dst_height == 0,
            ObjectShape::Threshold { .. } => false,
            ObjectShape::Scalar { .. } => false,
            ObjectShape::Distribution { bins, .. } => *bins == 0,
            ObjectShape::UserDataObject { size, .. } => *size == 0,
        }
    }

    /// A rough byte-size estimate, used by the allocator and by the executor's
    /// per-node bandwidth tally. Out-of-scope storage layouts mean this is
    /// necessarily approximate (e.g. no per-format bits-per-pixel table).
    pub fn estimated_bytes(&self) -> usize {
        match self {
            ObjectShape::Image { width, height, format } => {
                let bpp: usize = match format {
                    ImageFormat::U8 => 1,
                    ImageFormat::U16 | ImageFormat::S16 => 2,
                    ImageFormat::U32 | ImageFormat::S32 => 4,
                    ImageFormat::Rgb => 3,
                    ImageFormat::Rgba => 4,
                    ImageFormat::Nv12 => 3, // approximate (2 planes, 4:2:0)
                    ImageFormat::Yuv4 => 3,
                    ImageFormat::Virt => 0,
                };
                (*width as usize) * (*height as usize) * bpp
            }
            ObjectShape::Tensor { dims, data_type, .. } => {
                dims.iter().product::<usize>() * scalar_size(*data_type)
            }
            ObjectShape::Array { item_type, capacity } => capacity * scalar_size(*item_type),
            ObjectShape::Lut { item_type, count } => count * scalar_size(*item_type),
            ObjectShape::Matrix { data_type, columns, rows } => columns * rows * scalar_size(*data_type),
            ObjectShape::Convolution { columns, rows, .. } => columns * rows * scalar_size(ScalarType::Int16),
            ObjectShape::Pyramid {
                levels,
                scale,
                base_width,
                base_height,
                format,
            } => {
                let mut total = 0usize;
                let (mut w, mut h) = (*base_width as f64, *base_height as f64);
                let bpp = match format {
                    ImageFormat::U8 => 1.0,
                    _ => 2.0,
                };
                for _ in 0..*levels {
                    total += (w * h * bpp) as usize;
                    w *= *scale as f64;
                    h *= *scale as f64;
                }
                total
            }
            ObjectShape::Remap { dst_width, dst_height, .. } => {
                (*dst_width as usize) * (*dst_height as usize) * 8
            }
            ObjectShape::Threshold { .. } => scalar_size(ScalarType::Int32) * 2,
            ObjectShape::Scalar { data_type } => scalar_size(*data_type),
            ObjectShape::Distribution { bins, .. } => bins * scalar_size(ScalarType::Int32),
            ObjectShape::UserDataObject { size, .. } => *size,
            ObjectShape::ObjectArray { .. } => 0,
        }
    }
}

fn scalar_size(t: ScalarType) -> usize {
    match t {
        ScalarType::Int8 | ScalarType::UInt8 | ScalarType::Bool => 1,
        ScalarType::Int16 | ScalarType::UInt16 => 2,
        ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
        ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Float64 | ScalarType::Size => 8,
    }
}

/// The coordinate-range a (possibly sub-) data object occupies on its ultimate base
/// object. Used only by overlap resolution during verification.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlapRegion {
    /// Occupies the entirety of the base object (a plain, non-ROI image; a whole
    /// array; a scalar; etc).
    Whole,
    /// An image ROI or image view: occupies `Rectangle` of its base image.
    Rectangle(Rectangle),
    /// A single pyramid level: matches only the same level index of the same
    /// pyramid.
    PyramidLevel(usize),
    /// A tensor view: a half-open `[start, end)` range per dimension.
    TensorView(Vec<(usize, usize)>),
}

impl OverlapRegion {
    /// Two regions on the *same base object* overlap iff their coordinate ranges
    /// intersect.
    pub fn overlaps(&self, other: &OverlapRegion) -> bool {
        match (self, other) {
            (OverlapRegion::Whole, _) | (_, OverlapRegion::Whole) => true,
            (OverlapRegion::Rectangle(a), OverlapRegion::Rectangle(b)) => a.intersects(b),
            (OverlapRegion::PyramidLevel(a), OverlapRegion::PyramidLevel(b)) => a == b,
            (OverlapRegion::TensorView(a), OverlapRegion::TensorView(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|((s1, e1), (s2, e2))| s1 < e2 && s2 < e1)
            }
            _ => false,
        }
    }
}

/// A byte-range allocation for a data object's backing storage, as produced by the
/// external memory module during output allocation. The memory module itself is out
/// of scope; this is only the bookkeeping record the engine needs to know "this
/// parameter is backed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub size: usize,
}

/// External collaborator contract for backing-memory allocation. `DefaultAllocator`
/// is an in-process stand-in sized from
/// [`ObjectShape::estimated_bytes`]; a real back-end would allocate device/host memory
/// and return the actual region here.
pub trait MemoryAllocator: Send + Sync {
    fn allocate(&self, shape: &ObjectShape) -> crate::error::Result<MemoryRegion>;
}

pub struct DefaultAllocator;

impl MemoryAllocator for DefaultAllocator {
    fn allocate(&self, shape: &ObjectShape) -> crate::error::Result<MemoryRegion> {
        Ok(MemoryRegion {
            size: shape.estimated_bytes(),
        })
    }
}

/// A data object: the engine's view of an Image, Tensor, Array, and the rest of the
/// data-object kinds it tracks. Storage layout is out of scope; this struct is
/// shape/type metadata, an optional parent link for sub-objects, and a bookkeeping
/// memory-region record.
pub struct DataObject {
    pub header: Arc<ReferenceHeader>,
    pub shape: RwLock<ObjectShape>,
    /// Non-owning handle to the parent data object, for ROI/view/pyramid-level
    /// sub-objects. `None` for base (top-level) objects.
    pub parent: Option<RefHandle>,
    /// This object's coordinate range, interpreted relative to its ultimate base.
    pub region: OverlapRegion,
    pub memory: RwLock<Option<MemoryRegion>>,
    /// Valid region, maintained for `Image`/`Pyramid` kinds during verification.
    pub valid_rectangle: RwLock<Option<Rectangle>>,
    /// Owning handles of sub-objects carved out of this one (destroyed with it).
    pub children: RwLock<Vec<RefHandle>>,
}

impl DataObject {
    pub fn new(header: Arc<ReferenceHeader>, shape: ObjectShape, parent: Option<RefHandle>, region: OverlapRegion) -> Self {
        Self {
            header,
            shape: RwLock::new(shape),
            parent,
            region,
            memory: RwLock::new(None),
            valid_rectangle: RwLock::new(None),
            children: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.header.kind
    }

    pub fn is_allocated(&self) -> bool {
        self.memory.read().unwrap().is_some()
    }
}
