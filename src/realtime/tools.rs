//! Tool schemas exposed to the model and the mapping back from tool names.

use serde_json::{json, Value};

pub const SAVE_CLIENT_INFO: &str = "save_client_info";
pub const VALIDATE_PHONE: &str = "validate_phone";
pub const VALIDATE_ADDRESS: &str = "validate_address";

/// Service categories a request can be filed under.
pub const SERVICE_DIRECTIONS: [&str; 26] = [
    "Холодильники",
    "Кондиционеры",
    "Телевизоры",
    "Стиральные машины",
    "Посудомоечные машины",
    "Швейные машины",
    "Кофемашины",
    "Плиты",
    "Микроволновки",
    "Вытяжки",
    "Компьютеры",
    "Гаджеты",
    "Промышленный холод",
    "Газовые колонки",
    "Установка",
    "Пылесосы",
    "Клининг",
    "Дезинсекция",
    "Натяжные потолки",
    "Мелкобытовой сервис",
    "Ремонт квартир",
    "Сантехника",
    "Вывоз мусора",
    "Уборка",
    "Электрика",
    "Окна",
];

/// Tools the orchestrator knows how to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SaveClientInfo,
    ValidatePhone,
    ValidateAddress,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            SAVE_CLIENT_INFO => Some(Self::SaveClientInfo),
            VALIDATE_PHONE => Some(Self::ValidatePhone),
            VALIDATE_ADDRESS => Some(Self::ValidateAddress),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SaveClientInfo => SAVE_CLIENT_INFO,
            Self::ValidatePhone => VALIDATE_PHONE,
            Self::ValidateAddress => VALIDATE_ADDRESS,
        }
    }
}

fn address_properties() -> Value {
    json!({
        "city": { "type": "string", "description": "City" },
        "street": { "type": "string", "description": "Street" },
        "house_number": { "type": "string", "description": "House / building / block" },
        "apartment": { "type": "string", "description": "Apartment" },
        "entrance": { "type": "string", "description": "Entrance" },
        "floor": { "type": "string", "description": "Floor" },
        "intercom": { "type": "string", "description": "Intercom code" },
        "latitude": { "type": "number", "description": "Latitude" },
        "longitude": { "type": "number", "description": "Longitude" }
    })
}

/// The `tools` array sent in `session.update`.
pub fn tool_schemas() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "name": SAVE_CLIENT_INFO,
            "description": "Create the client's service request once every field is confirmed.",
            "parameters": {
                "type": "object",
                "required": ["name", "direction", "phone", "address"],
                "properties": {
                    "name": { "type": "string", "description": "Client name" },
                    "direction": {
                        "type": "string",
                        "description": "Reason for the call",
                        "enum": SERVICE_DIRECTIONS,
                    },
                    "circumstances": { "type": "string", "description": "Details of the fault or request" },
                    "brand": { "type": "string", "description": "Appliance brand and model in one line" },
                    "phone": {
                        "type": "string",
                        "description": "Contact phone as +7XXXXXXXXXX",
                        "pattern": "^\\+7\\d{10}$"
                    },
                    "address": {
                        "type": "object",
                        "description": "Visit address",
                        "required": ["city", "street", "house_number"],
                        "properties": address_properties()
                    },
                    "date": {
                        "type": "string",
                        "description": "Preferred visit date (YYYY-MM-DD). Resolve relative phrases against the current date in the instructions.",
                        "pattern": "^\\d{4}-\\d{2}-\\d{2}$"
                    },
                    "comment": { "type": "string", "description": "Extra comment" }
                }
            }
        }),
        json!({
            "type": "function",
            "name": VALIDATE_PHONE,
            "description": "Validate and normalize the phone number the caller dictated.",
            "parameters": {
                "type": "object",
                "required": ["phone"],
                "properties": {
                    "phone": { "type": "string", "description": "Phone number as spoken by the caller" }
                }
            }
        }),
        json!({
            "type": "function",
            "name": VALIDATE_ADDRESS,
            "description": "Geocode the address; returns normalized components and coordinates.",
            "parameters": {
                "type": "object",
                "required": ["city", "street", "house_number"],
                "properties": {
                    "city": { "type": "string", "description": "City" },
                    "street": { "type": "string", "description": "Street" },
                    "house_number": { "type": "string", "description": "House / building / block" }
                }
            }
        }),
    ]
}
