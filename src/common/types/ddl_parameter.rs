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
use crate::common::types::value_object::ValueObjectable;
use regex::Regex;
use std::fmt::Display;

/// An identifier that is safe to interpolate into DDL statements.
///
/// DDL cannot be parameterized with bind values, so role and database names
/// used while allocating a dedicated tenant database must be restricted to a
/// conservative character set before they are spliced into SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct DdlParameter(pub String);

impl ValueObjectable for DdlParameter {
    type DataType = String;

    fn validate(&self) -> Result<(), String> {
        let re = Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").map_err(|e| e.to_string())?;
        if re.is_match(&self.0) {
            Ok(())
        } else {
            Err(String::from("Érvénytelen azonosító!"))
        }
    }

    fn get_value(&self) -> &Self::DataType {
        &self.0
    }
}

impl Display for DdlParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::value_object::ValueObject;

    #[test]
    fn accepts_safe_identifiers() {
        assert!(ValueObject::new(DdlParameter("tenant_abc123".to_string())).is_ok());
        assert!(ValueObject::new(DdlParameter("_internal".to_string())).is_ok());
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(ValueObject::new(DdlParameter("tenant; DROP TABLE".to_string())).is_err());
        assert!(ValueObject::new(DdlParameter("Tenant".to_string())).is_err());
        assert!(ValueObject::new(DdlParameter(String::new())).is_err());
    }
}
