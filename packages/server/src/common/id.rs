//! Typed UUID wrappers for compile-time type safety.
//!
//! `Id<T>` wraps a `uuid::Uuid` and carries the entity it identifies as a
//! phantom type, so a `StepId` can never be passed where a `RequestId` was
//! expected. IDs are UUID v7 (time-ordered) which keeps primary-key indexes
//! append-friendly.
//!
//! # Example
//!
//! ```rust
//! use approval_core::common::{RequestId, StepId};
//!
//! let request_id = RequestId::new();
//! let step_id = StepId::new();
//!
//! // This would be a compile error:
//! // let wrong: StepId = request_id;
//! # let _ = (request_id, step_id);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A typed wrapper around `Uuid`.
///
/// IDs with different `T` parameters are incompatible at compile time:
///
/// ```compile_fail
/// use approval_core::common::Id;
///
/// struct Request;
/// struct Step;
///
/// let request_id: Id<Request> = Id::new();
/// let step_id: Id<Step> = request_id;
/// ```
#[repr(transparent)]
pub struct Id<T>(Uuid, PhantomData<fn() -> T>);

impl<T> Id<T> {
    /// Creates a new time-ordered (v7) ID.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7(), PhantomData)
    }

    /// Wraps an existing `Uuid`, e.g. one loaded from the database.
    #[inline]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    #[inline]
    pub fn into_uuid(self) -> Uuid {
        self.0
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parses an `Id` from its hyphenated string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID.
    #[inline]
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?, PhantomData))
    }

}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Standard trait implementations
// ============================================================================
//
// Written by hand so that `T` (a zero-sized marker) does not need to
// implement any of these traits itself.

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or("?");
        f.debug_tuple(&format!("Id<{}>", name))
            .field(&self.0)
            .finish()
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> From<Uuid> for Id<T> {
    #[inline]
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<T> From<Id<T>> for Uuid {
    #[inline]
    fn from(id: Id<T>) -> Self {
        id.0
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Serde support
// ============================================================================

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

// ============================================================================
// sqlx support
// ============================================================================

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type};

impl<T> Type<Postgres> for Id<T> {
    fn type_info() -> PgTypeInfo {
        <Uuid as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <Uuid as Type<Postgres>>::compatible(ty)
    }
}

impl<T> PgHasArrayType for Id<T> {
    fn array_type_info() -> PgTypeInfo {
        <Uuid as PgHasArrayType>::array_type_info()
    }
}

impl<T> Encode<'_, Postgres> for Id<T> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <Uuid as Encode<Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl<T> Decode<'_, Postgres> for Id<T> {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        <Uuid as Decode<Postgres>>::decode(value).map(Self::from_uuid)
    }
}
