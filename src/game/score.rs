//! Score sheet cells and the values they may hold

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Wire tag for the instant-win marker
pub const INSTANT_WIN_TAG: &str = "INSTANT_WIN";

/// Marker written by older builds, read back as `InstantWin`
const LEGACY_INSTANT_WIN_TAG: &str = "DORMIDA";

/// Fixed value scored in a grande cell
pub const GRANDE_POINTS: u32 = 50;

/// The 11 canonical slots of a player's sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CellPosition {
    #[serde(rename = "1-1")]
    Balas,
    #[serde(rename = "1-2")]
    Escalera,
    #[serde(rename = "1-3")]
    Cuadras,
    #[serde(rename = "2-1")]
    Tontos,
    #[serde(rename = "2-2")]
    Full,
    #[serde(rename = "2-3")]
    Quinas,
    #[serde(rename = "3-1")]
    Trenes,
    #[serde(rename = "3-2")]
    Poker,
    #[serde(rename = "3-3")]
    Senas,
    #[serde(rename = "4-1")]
    FirstGrande,
    #[serde(rename = "4-2")]
    SecondGrande,
}

impl CellPosition {
    /// All positions in sheet order
    pub const ALL: [CellPosition; 11] = [
        CellPosition::Balas,
        CellPosition::Escalera,
        CellPosition::Cuadras,
        CellPosition::Tontos,
        CellPosition::Full,
        CellPosition::Quinas,
        CellPosition::Trenes,
        CellPosition::Poker,
        CellPosition::Senas,
        CellPosition::FirstGrande,
        CellPosition::SecondGrande,
    ];

    /// Storage key used in snapshots
    pub fn key(self) -> &'static str {
        match self {
            Self::Balas => "1-1",
            Self::Escalera => "1-2",
            Self::Cuadras => "1-3",
            Self::Tontos => "2-1",
            Self::Full => "2-2",
            Self::Quinas => "2-3",
            Self::Trenes => "3-1",
            Self::Poker => "3-2",
            Self::Senas => "3-3",
            Self::FirstGrande => "4-1",
            Self::SecondGrande => "4-2",
        }
    }

    /// Human cell name, recorded in the move log
    pub fn label(self) -> &'static str {
        match self {
            Self::Balas => "Balas",
            Self::Escalera => "Escalera",
            Self::Cuadras => "Cuadras",
            Self::Tontos => "Tontos",
            Self::Full => "Full",
            Self::Quinas => "Quinas",
            Self::Trenes => "Trenes",
            Self::Poker => "Poker",
            Self::Senas => "Senas",
            Self::FirstGrande => "1ra Grande",
            Self::SecondGrande => "2da Grande",
        }
    }

    pub fn category(self) -> CellCategory {
        match self {
            Self::Balas => CellCategory::SingleNumber { face: 1 },
            Self::Tontos => CellCategory::SingleNumber { face: 2 },
            Self::Trenes => CellCategory::SingleNumber { face: 3 },
            Self::Cuadras => CellCategory::SingleNumber { face: 4 },
            Self::Quinas => CellCategory::SingleNumber { face: 5 },
            Self::Senas => CellCategory::SingleNumber { face: 6 },
            Self::Escalera => CellCategory::Combination(Hand::Escalera),
            Self::Full => CellCategory::Combination(Hand::Full),
            Self::Poker => CellCategory::Combination(Hand::Poker),
            Self::FirstGrande | Self::SecondGrande => CellCategory::Grande,
        }
    }

    #[cfg(test)]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }
}

impl fmt::Display for CellPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.key())
    }
}

/// Named combination hands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    Escalera,
    Full,
    Poker,
}

impl Hand {
    /// Points for the hand made on the first roll
    pub fn mano_points(self) -> u32 {
        match self {
            Self::Escalera => 25,
            Self::Full => 35,
            Self::Poker => 45,
        }
    }

    /// Points for the hand built over several rolls
    pub fn huevo_points(self) -> u32 {
        match self {
            Self::Escalera => 20,
            Self::Full => 30,
            Self::Poker => 40,
        }
    }
}

/// Scoring rule family a position belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellCategory {
    /// Counts one die face; scores a multiple of it (1 to 5 dice)
    SingleNumber { face: u32 },
    Combination(Hand),
    Grande,
}

impl CellCategory {
    /// Whether `value` may be written to a cell of this category.
    /// Empty (clear) and 0 (struck) are legal everywhere.
    pub fn allows(self, value: ScoreCellValue) -> bool {
        match (self, value) {
            (_, ScoreCellValue::Empty) | (_, ScoreCellValue::Numeric(0)) => true,
            (Self::SingleNumber { face }, ScoreCellValue::Numeric(n)) => {
                n % face == 0 && (1..=5).contains(&(n / face))
            }
            (Self::Combination(hand), ScoreCellValue::Numeric(n)) => {
                n == hand.mano_points() || n == hand.huevo_points()
            }
            (Self::Grande, ScoreCellValue::Numeric(n)) => n == GRANDE_POINTS,
            (Self::Grande, ScoreCellValue::InstantWin) => true,
            (_, ScoreCellValue::InstantWin) => false,
        }
    }
}

/// Value stored in a single score slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreCellValue {
    /// Not yet played
    #[default]
    Empty,
    /// Points scored; 0 means the cell was struck
    Numeric(u32),
    /// Ends the match and names the player the outright winner
    InstantWin,
}

impl ScoreCellValue {
    /// Contribution to the player's total
    pub fn points(self) -> u32 {
        match self {
            Self::Numeric(n) => n,
            Self::Empty | Self::InstantWin => 0,
        }
    }

    #[cfg(test)]
    pub fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Display for ScoreCellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::Numeric(n) => write!(f, "{n}"),
            Self::InstantWin => f.write_str(INSTANT_WIN_TAG),
        }
    }
}

impl Serialize for ScoreCellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_none(),
            Self::Numeric(n) => serializer.serialize_u32(*n),
            Self::InstantWin => serializer.serialize_str(INSTANT_WIN_TAG),
        }
    }
}

impl<'de> Deserialize<'de> for ScoreCellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Points(u32),
            Marker(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(Self::Empty),
            Some(Raw::Points(n)) => Ok(Self::Numeric(n)),
            Some(Raw::Marker(tag)) if tag == INSTANT_WIN_TAG || tag == LEGACY_INSTANT_WIN_TAG => {
                Ok(Self::InstantWin)
            }
            Some(Raw::Marker(other)) => Err(de::Error::custom(format!(
                "unknown cell marker `{other}`"
            ))),
        }
    }
}

/// One player's sheet: every canonical position mapped to a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCard {
    cells: BTreeMap<CellPosition, ScoreCellValue>,
}

impl ScoreCard {
    pub fn new() -> Self {
        Self {
            cells: CellPosition::ALL
                .into_iter()
                .map(|p| (p, ScoreCellValue::Empty))
                .collect(),
        }
    }

    pub fn get(&self, position: CellPosition) -> ScoreCellValue {
        self.cells.get(&position).copied().unwrap_or_default()
    }

    pub(crate) fn set(&mut self, position: CellPosition, value: ScoreCellValue) {
        self.cells.insert(position, value);
    }

    /// Sum of numeric cells
    pub fn total(&self) -> u32 {
        self.cells.values().map(|v| v.points()).sum()
    }

    pub fn has_instant_win(&self) -> bool {
        self.cells.values().any(|v| *v == ScoreCellValue::InstantWin)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (CellPosition, ScoreCellValue)> + '_ {
        self.cells.iter().map(|(p, v)| (*p, *v))
    }
}

impl Default for ScoreCard {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for ScoreCard {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(CellPosition::ALL.len()))?;
        for position in CellPosition::ALL {
            map.serialize_entry(position.key(), &self.get(position))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ScoreCard {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The cloud database drops null members, so absent keys are Empty.
        let stored = BTreeMap::<CellPosition, ScoreCellValue>::deserialize(deserializer)?;
        let mut card = Self::new();
        for (position, value) in stored {
            if !position.category().allows(value) {
                return Err(de::Error::custom(format!(
                    "{value} is not a legal value for {position}"
                )));
            }
            card.set(position, value);
        }
        Ok(card)
    }
}
