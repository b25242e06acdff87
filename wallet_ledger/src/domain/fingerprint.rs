use serde_json::Value;
use sha2::{Digest, Sha256};

/// Huella digital estable de una petición de mutación.
///
/// Se calcula como `sha256(UPPERCASE(method) | path | canonical(body))` en hex
/// minúscula (64 caracteres). La serialización canónica garantiza que dos
/// cuerpos estructuralmente iguales como JSON produzcan la misma huella sin
/// importar el orden de inserción de las claves.
///
/// La huella se calcula sobre el cuerpo decodificado tal cual llegó: no se
/// normalizan montos, así que el número `1` y el string `"1"` difieren.
pub fn request_fingerprint(method: &str, path: &str, body: &Value) -> String {
    let mut canonical = String::new();
    canonicalize_value(body, &mut canonical);

    let composed = format!("{}|{}|{}", method.to_uppercase(), path, canonical);

    let mut hasher = Sha256::new();
    hasher.update(composed.as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialización canónica recursiva de un valor JSON.
///
/// Primitivos y null en su forma literal, arrays en orden, objetos con las
/// claves ordenadas por code point.
fn canonicalize_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json escapa el string exactamente como en el wire
            out.push_str(&Value::String(s.clone()).to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                canonicalize_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}
