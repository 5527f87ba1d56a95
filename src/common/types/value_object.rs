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
use std::fmt::Display;

/// A trait representing a container for value object data. Implementers pair
/// a raw inner type with a validation rule; `ValueObject::new` refuses to
/// construct the wrapper when the rule fails.
///
/// # Associated Types
/// * `DataType` - The type of the data contained within the value object.
///
/// # Provided Methods
///
/// ## `fn validate(&self) -> Result<(), String>`
/// Validates the contained data.
///
/// ## `fn get_value(&self) -> &Self::DataType`
/// Retrieves a reference to the contained data.
pub trait ValueObjectable: Display {
    type DataType;
    /// Validates the implementation or object.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: If the validation is successful.
    /// - `Err(String)`: If the validation fails, containing an error message.
    fn validate(&self) -> Result<(), String>;
    /// Retrieves a reference to the data associated with the current instance.
    fn get_value(&self) -> &Self::DataType;
}

/// A generic `ValueObject` struct that wraps a single data type, `DataType`.
///
/// # Notes
/// - It is used to enforce type safety for specific domain concepts where
///   primitive types alone might not provide adequate clarity or constraint.
/// - An instance can only be obtained through `new`, so a `ValueObject` in
///   hand is always a validated one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueObject<DataType>(DataType);

impl<DataType> ValueObject<DataType>
where
    DataType: ValueObjectable,
{
    /// Creates a new `ValueObject` instance from the provided `data`.
    ///
    /// # Returns
    /// - `Ok(ValueObject<DataType>)` - If the provided `data` successfully passes validation.
    /// - `Err(String)` - If the `data` validation fails, an error message will be returned.
    pub fn new(data: DataType) -> Result<ValueObject<DataType>, String> {
        data.validate()?;
        Ok(ValueObject(data))
    }
}

impl<DataType> ValueObject<DataType> {
    /// Retrieves a reference to the inner data stored within the wrapper.
    pub fn extract(&self) -> &DataType {
        &self.0
    }
}

impl<DataType> Display for ValueObject<DataType>
where
    DataType: Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone)]
    struct Lowercase(String);

    impl ValueObjectable for Lowercase {
        type DataType = String;
        fn validate(&self) -> Result<(), String> {
            if self.0.chars().all(|c| c.is_ascii_lowercase()) {
                Ok(())
            } else {
                Err(String::from("Csak kisbetű megengedett!"))
            }
        }
        fn get_value(&self) -> &Self::DataType {
            &self.0
        }
    }

    impl Display for Lowercase {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[test]
    fn value_object_rejects_invalid_data() {
        let res = ValueObject::new(Lowercase(String::from("Tanoda"))).unwrap_err();
        assert_eq!(res, "Csak kisbetű megengedett!");
        let ok = ValueObject::new(Lowercase(String::from("tanoda"))).unwrap();
        assert_eq!(ok.extract().get_value(), "tanoda");
    }
}
