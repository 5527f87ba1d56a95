/*
 * This file is part of the Tanoda LMS.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */
use crate::common::types::value_object::{ValueObject, ValueObjectable};
use serde::{Deserialize, Deserializer};
use std::fmt::Display;

pub const TIER_NAMES: [&str; 4] = ["free", "basic", "professional", "enterprise"];

/// The name of a subscription tier. Tiers are reference data; the accepted
/// names are fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct TierName(pub String);

impl ValueObjectable for TierName {
    type DataType = String;

    fn validate(&self) -> Result<(), String> {
        if TIER_NAMES.contains(&self.0.as_str()) {
            Ok(())
        } else {
            Err(String::from("Ismeretlen előfizetési csomag!"))
        }
    }

    fn get_value(&self) -> &Self::DataType {
        &self.0
    }
}

impl Display for TierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ValueObject<TierName> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ValueObject::new(TierName(s.to_lowercase())).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_tiers_are_accepted() {
        for name in TIER_NAMES {
            assert!(ValueObject::new(TierName(name.to_string())).is_ok());
        }
        assert!(ValueObject::new(TierName(String::from("platinum"))).is_err());
    }
}
