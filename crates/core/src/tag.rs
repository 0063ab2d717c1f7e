use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Logical channel of a frame. The numeric codes are part of the wire format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Tag {
    Register = 1,
    Login = 2,
    AddEvent = 3,
    AggregateQuantity = 4,
    AggregateVolume = 5,
    AggregateAverage = 6,
    AggregateMax = 7,
    SimultaneousSales = 8,
    ConsecutiveSales = 9,
    NewDay = 10,
    FilterEvents = 11,
}

impl Tag {
    pub const ALL: [Tag; 11] = [
        Tag::Register,
        Tag::Login,
        Tag::AddEvent,
        Tag::AggregateQuantity,
        Tag::AggregateVolume,
        Tag::AggregateAverage,
        Tag::AggregateMax,
        Tag::SimultaneousSales,
        Tag::ConsecutiveSales,
        Tag::NewDay,
        Tag::FilterEvents,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<Tag> for i32 {
    fn from(tag: Tag) -> Self {
        tag.code()
    }
}

impl TryFrom<i32> for Tag {
    type Error = CoreError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Tag::ALL
            .into_iter()
            .find(|tag| tag.code() == code)
            .ok_or(CoreError::UnknownTag(code))
    }
}

/// The four per-product aggregates computed over closed days.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Quantity,
    Volume,
    Average,
    Max,
}

impl AggregateKind {
    pub fn tag(self) -> Tag {
        match self {
            AggregateKind::Quantity => Tag::AggregateQuantity,
            AggregateKind::Volume => Tag::AggregateVolume,
            AggregateKind::Average => Tag::AggregateAverage,
            AggregateKind::Max => Tag::AggregateMax,
        }
    }
}
