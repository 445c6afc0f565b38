//! PostgreSQL type table and the mapping from backend column types.

pub mod oids {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const CHAR: u32 = 18;
    pub const NAME: u32 = 19;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT2VECTOR: u32 = 22;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const UNKNOWN: u32 = 705;
    pub const BOOL_ARRAY: u32 = 1000;
    pub const INT2_ARRAY: u32 = 1005;
    pub const INT4_ARRAY: u32 = 1007;
    pub const TEXT_ARRAY: u32 = 1009;
    pub const INT8_ARRAY: u32 = 1016;
    pub const FLOAT4_ARRAY: u32 = 1021;
    pub const FLOAT8_ARRAY: u32 = 1022;
    pub const OID_ARRAY: u32 = 1028;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const BIT: u32 = 1560;
    pub const NUMERIC: u32 = 1700;
    pub const REGCLASS: u32 = 2205;
    pub const VECTOR: u32 = 16388;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgType {
    pub oid: u32,
    pub name: &'static str,
    /// `typlen`: fixed width in bytes, or -1 for varlena.
    pub len: i16,
    /// Element type OID for array types, 0 otherwise.
    pub elem: u32,
}

const fn ty(oid: u32, name: &'static str, len: i16, elem: u32) -> PgType {
    PgType {
        oid,
        name,
        len,
        elem,
    }
}

pub const BUILTIN_TYPES: &[PgType] = &[
    ty(oids::BOOL, "bool", 1, 0),
    ty(oids::BYTEA, "bytea", -1, 0),
    ty(oids::CHAR, "char", 1, 0),
    ty(oids::NAME, "name", 64, 0),
    ty(oids::INT8, "int8", 8, 0),
    ty(oids::INT2, "int2", 2, 0),
    ty(oids::INT2VECTOR, "int2vector", -1, oids::INT2),
    ty(oids::INT4, "int4", 4, 0),
    ty(oids::TEXT, "text", -1, 0),
    ty(oids::OID, "oid", 4, 0),
    ty(oids::FLOAT4, "float4", 4, 0),
    ty(oids::FLOAT8, "float8", 8, 0),
    ty(oids::UNKNOWN, "unknown", -2, 0),
    ty(oids::BOOL_ARRAY, "_bool", -1, oids::BOOL),
    ty(oids::INT2_ARRAY, "_int2", -1, oids::INT2),
    ty(oids::INT4_ARRAY, "_int4", -1, oids::INT4),
    ty(oids::TEXT_ARRAY, "_text", -1, oids::TEXT),
    ty(oids::INT8_ARRAY, "_int8", -1, oids::INT8),
    ty(oids::FLOAT4_ARRAY, "_float4", -1, oids::FLOAT4),
    ty(oids::FLOAT8_ARRAY, "_float8", -1, oids::FLOAT8),
    ty(oids::OID_ARRAY, "_oid", -1, oids::OID),
    ty(oids::BPCHAR, "bpchar", -1, 0),
    ty(oids::VARCHAR, "varchar", -1, 0),
    ty(oids::DATE, "date", 4, 0),
    ty(oids::TIME, "time", 8, 0),
    ty(oids::TIMESTAMP, "timestamp", 8, 0),
    ty(oids::TIMESTAMPTZ, "timestamptz", 8, 0),
    ty(oids::BIT, "bit", -1, 0),
    ty(oids::NUMERIC, "numeric", -1, 0),
    ty(oids::REGCLASS, "regclass", 4, 0),
    ty(oids::VECTOR, "vector", -1, 0),
];

impl PgType {
    pub fn by_oid(oid: u32) -> Option<PgType> {
        BUILTIN_TYPES.iter().copied().find(|t| t.oid == oid)
    }

    pub fn by_name(name: &str) -> Option<PgType> {
        BUILTIN_TYPES
            .iter()
            .copied()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn is_array(&self) -> bool {
        self.elem != 0
    }

    pub fn element(&self) -> Option<PgType> {
        if self.elem == 0 {
            None
        } else {
            PgType::by_oid(self.elem)
        }
    }

    /// Maps a backend column type name (`VARCHAR(50)`, `NUMERIC(10,2)`,
    /// `VECTOR(FLOAT,3)`, `SMALLINT[]`) to its PostgreSQL type. Unknown
    /// types are reported as `varchar` so clients can still read the text.
    pub fn from_backend(type_name: &str) -> PgType {
        let spec = TypeSpec::parse(type_name);
        if spec.array {
            let elem = PgType::from_backend(&spec.base);
            return match elem.oid {
                oids::INT2 => ty(oids::INT2_ARRAY, "_int2", -1, oids::INT2),
                oids::INT4 => ty(oids::INT4_ARRAY, "_int4", -1, oids::INT4),
                oids::INT8 => ty(oids::INT8_ARRAY, "_int8", -1, oids::INT8),
                oids::OID => ty(oids::OID_ARRAY, "_oid", -1, oids::OID),
                oids::BOOL => ty(oids::BOOL_ARRAY, "_bool", -1, oids::BOOL),
                oids::FLOAT4 => ty(oids::FLOAT4_ARRAY, "_float4", -1, oids::FLOAT4),
                oids::FLOAT8 => ty(oids::FLOAT8_ARRAY, "_float8", -1, oids::FLOAT8),
                _ => ty(oids::TEXT_ARRAY, "_text", -1, oids::TEXT),
            };
        }
        let oid = match spec.base.as_str() {
            "BIGINT" | "INT8" => oids::INT8,
            "INTEGER" | "INT" | "INT4" | "MEDIUMINT" => oids::INT4,
            "SMALLINT" | "TINYINT" | "INT2" => oids::INT2,
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" => oids::FLOAT8,
            "REAL" | "FLOAT4" => oids::FLOAT4,
            "NUMERIC" | "DECIMAL" | "MONEY" => oids::NUMERIC,
            "BIT" | "BOOLEAN" | "BOOL" => oids::BOOL,
            "DATE" => oids::DATE,
            "TIME" => oids::TIME,
            "TIMESTAMP" | "DATETIME" | "POSIXTIME" => oids::TIMESTAMP,
            "TIMESTAMPTZ" => oids::TIMESTAMPTZ,
            "VARBINARY" | "LONGVARBINARY" | "BINARY" | "BYTEA" => oids::BYTEA,
            "LONGVARCHAR" | "TEXT" | "CLOB" => oids::TEXT,
            "CHAR" | "CHARACTER" | "BPCHAR" => oids::BPCHAR,
            "VECTOR" | "EMBEDDING" => oids::VECTOR,
            "OID" | "REGCLASS" => oids::OID,
            "NAME" => oids::NAME,
            "PG_CHAR" => oids::CHAR,
            _ => oids::VARCHAR,
        };
        PgType::by_oid(oid).unwrap_or(ty(oids::VARCHAR, "varchar", -1, 0))
    }
}

/// A backend type name split into base name, numeric modifiers and an array
/// marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    pub base: String,
    pub modifiers: Vec<String>,
    pub array: bool,
}

impl TypeSpec {
    pub fn parse(type_name: &str) -> Self {
        let mut text = type_name.trim().to_ascii_uppercase();
        let array = text.ends_with("[]");
        if array {
            text.truncate(text.len() - 2);
        }
        let (base, modifiers) = match text.find('(') {
            Some(open) => {
                let close = text.rfind(')').unwrap_or(text.len());
                let inner = &text[open + 1..close.max(open + 1)];
                let modifiers = inner
                    .split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect();
                (text[..open].trim().to_string(), modifiers)
            }
            None => (text.trim().to_string(), Vec::new()),
        };
        let base = match base.as_str() {
            "CHARACTER VARYING" => "VARCHAR".to_string(),
            _ => base,
        };
        Self {
            base,
            modifiers,
            array,
        }
    }

    pub fn numeric_modifiers(&self) -> Vec<i32> {
        self.modifiers
            .iter()
            .filter_map(|m| m.parse::<i32>().ok())
            .collect()
    }
}

/// `atttypmod` for a declared backend type, using PostgreSQL's encoding:
/// character types store `length + 4`, exact numerics store
/// `((precision << 16) | scale) + 4`, everything else `-1`.
pub fn type_modifier(type_name: &str) -> i32 {
    let spec = TypeSpec::parse(type_name);
    let mods = spec.numeric_modifiers();
    match spec.base.as_str() {
        "VARCHAR" | "CHAR" | "CHARACTER" | "BPCHAR" => {
            mods.first().map(|len| len + 4).unwrap_or(-1)
        }
        "NUMERIC" | "DECIMAL" => match mods.as_slice() {
            [precision] => numeric_typmod(*precision, 0),
            [precision, scale, ..] => numeric_typmod(*precision, *scale),
            [] => -1,
        },
        _ => -1,
    }
}

/// `atttypmod` from separately reported length/precision/scale metadata.
pub fn type_modifier_for(
    pg: &PgType,
    char_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> i32 {
    match pg.oid {
        oids::VARCHAR | oids::BPCHAR => char_length.map(|len| len + 4).unwrap_or(-1),
        oids::NUMERIC => match precision {
            Some(p) => numeric_typmod(p, scale.unwrap_or(0)),
            None => -1,
        },
        _ => -1,
    }
}

fn numeric_typmod(precision: i32, scale: i32) -> i32 {
    ((precision << 16) | (scale & 0xffff)) + 4
}

/// Human-readable type as `format_type(oid, typmod)` renders it.
pub fn format_type(oid: u32, typmod: i32) -> Option<String> {
    let base = match oid {
        oids::BOOL => "boolean",
        oids::BYTEA => "bytea",
        oids::CHAR => "\"char\"",
        oids::NAME => "name",
        oids::INT8 => "bigint",
        oids::INT2 => "smallint",
        oids::INT4 => "integer",
        oids::TEXT => "text",
        oids::OID => "oid",
        oids::FLOAT4 => "real",
        oids::FLOAT8 => "double precision",
        oids::BPCHAR => "character",
        oids::VARCHAR => "character varying",
        oids::DATE => "date",
        oids::TIME => "time without time zone",
        oids::TIMESTAMP => "timestamp without time zone",
        oids::TIMESTAMPTZ => "timestamp with time zone",
        oids::NUMERIC => "numeric",
        oids::VECTOR => "vector",
        oids::INT2_ARRAY => "smallint[]",
        oids::INT4_ARRAY => "integer[]",
        oids::TEXT_ARRAY => "text[]",
        oids::OID_ARRAY => "oid[]",
        _ => return PgType::by_oid(oid).map(|t| t.name.to_string()),
    };
    let rendered = match oid {
        oids::VARCHAR | oids::BPCHAR if typmod >= 4 => format!("{base}({})", typmod - 4),
        oids::NUMERIC if typmod >= 4 => {
            let packed = typmod - 4;
            format!("{base}({},{})", (packed >> 16) & 0xffff, packed & 0xffff)
        }
        _ => base.to_string(),
    };
    Some(rendered)
}
