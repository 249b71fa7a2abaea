//! Durable object registry
//!
//! Every type that can live in the heap is listed once here. The heap stores
//! `DurableObject` values; `Durable` gives typed access to each variant.
//!
//! A value is charged its fixed size plus the `Payload` it owns, so bins,
//! blobs and nodes cost more as they grow.

use serde::{Deserialize, Serialize};

use crate::btree::{TreeNodeDf, TreeRootDf};
use crate::catalog::ContainerDf;
use crate::container::ObjectDf;
use crate::dtx::DtxCmtBlobDf;
use crate::pool::PoolDf;

/// Bytes a durable value owns outside its fixed part
pub trait Payload {
    fn payload_bytes(&self) -> u64 {
        0
    }
}

/// A type stored in the persistent heap
pub trait Durable: Payload + Clone + Default + Send + Sync + 'static {
    /// Name used in diagnostics
    const KIND: &'static str;

    /// Fixed bytes of every value, also the address space it takes
    const FOOTPRINT: u64 = std::mem::size_of::<Self>() as u64;

    /// Bytes charged against heap capacity
    fn footprint(&self) -> u64 {
        Self::FOOTPRINT + self.payload_bytes()
    }

    fn into_object(self) -> DurableObject;

    fn from_object(object: &DurableObject) -> Option<&Self>;

    fn from_object_mut(object: &mut DurableObject) -> Option<&mut Self>;
}

macro_rules! durable_objects {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        /// Any object the heap can hold
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum DurableObject {
            $($variant($ty)),+
        }

        impl DurableObject {
            pub fn kind(&self) -> &'static str {
                match self {
                    $(DurableObject::$variant(_) => <$ty as Durable>::KIND),+
                }
            }

            pub fn footprint(&self) -> u64 {
                match self {
                    $(DurableObject::$variant(value) => value.footprint()),+
                }
            }
        }

        $(
            impl Durable for $ty {
                const KIND: &'static str = stringify!($variant);

                fn into_object(self) -> DurableObject {
                    DurableObject::$variant(self)
                }

                fn from_object(object: &DurableObject) -> Option<&Self> {
                    match object {
                        DurableObject::$variant(value) => Some(value),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn from_object_mut(object: &mut DurableObject) -> Option<&mut Self> {
                    match object {
                        DurableObject::$variant(value) => Some(value),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )+
    };
}

durable_objects! {
    Pool(PoolDf),
    TreeRoot(TreeRootDf),
    TreeNode(TreeNodeDf),
    Container(ContainerDf),
    Object(ObjectDf),
    DtxBlob(DtxCmtBlobDf),
}

fn slice_bytes<T>(items: &[T]) -> u64 {
    (items.len() * std::mem::size_of::<T>()) as u64
}

impl Payload for PoolDf {
    fn payload_bytes(&self) -> u64 {
        slice_bytes(&self.gc_bin)
    }
}

impl Payload for TreeRootDf {}

impl Payload for TreeNodeDf {
    fn payload_bytes(&self) -> u64 {
        let key_bytes: u64 = self.keys.iter().map(|key| key.len() as u64).sum();
        key_bytes + slice_bytes(&self.keys) + slice_bytes(&self.slots)
    }
}

impl Payload for ContainerDf {
    fn payload_bytes(&self) -> u64 {
        slice_bytes(&self.gc_bin)
    }
}

impl Payload for ObjectDf {}

impl Payload for DtxCmtBlobDf {
    fn payload_bytes(&self) -> u64 {
        slice_bytes(&self.records)
    }
}
