// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Length unit extraction for STEP files
//!
//! Resolves the model's length unit to a millimetre scale factor, following
//! `GLOBAL_UNIT_ASSIGNED_CONTEXT` when present and falling back to the first
//! `LENGTH_UNIT` instance in the file.

use tracing::debug;

use crate::decoder::EntityDecoder;
use crate::entity::DecodedEntity;
use crate::error::Result;

/// SI prefix multipliers
#[inline]
pub fn get_si_prefix_multiplier(prefix: &str) -> f64 {
    match prefix {
        "EXA" => 1e18,
        "PETA" => 1e15,
        "TERA" => 1e12,
        "GIGA" => 1e9,
        "MEGA" => 1e6,
        "KILO" => 1e3,
        "HECTO" => 1e2,
        "DECA" => 1e1,
        "DECI" => 1e-1,
        "CENTI" => 1e-2,
        "MILLI" => 1e-3,
        "MICRO" => 1e-6,
        "NANO" => 1e-9,
        "PICO" => 1e-12,
        "FEMTO" => 1e-15,
        "ATTO" => 1e-18,
        _ => 1.0,
    }
}

/// Millimetres per named conversion-based unit, used when the conversion
/// factor itself cannot be resolved
fn named_unit_mm(name: &str) -> Option<f64> {
    match name.to_ascii_uppercase().as_str() {
        "INCH" | "IN" => Some(25.4),
        "FOOT" | "FT" => Some(304.8),
        "YARD" => Some(914.4),
        "MILE" => Some(1_609_344.0),
        "MIL" | "THOU" => Some(0.0254),
        "MILLIMETRE" | "MILLIMETER" | "MM" => Some(1.0),
        "CENTIMETRE" | "CENTIMETER" | "CM" => Some(10.0),
        "METRE" | "METER" | "M" => Some(1000.0),
        _ => None,
    }
}

/// Millimetre scale of one unit instance, or `None` if it is not a length unit
fn length_unit_mm(decoder: &mut EntityDecoder, unit: &DecodedEntity, depth: u8) -> Result<Option<f64>> {
    if !unit.has_type("LENGTH_UNIT") || depth > 4 {
        return Ok(None);
    }

    if let Some(si) = unit.record("SI_UNIT") {
        // SI_UNIT(prefix, name)
        let prefix = si.attributes.first().and_then(|v| v.as_enum()).unwrap_or("");
        return Ok(Some(1000.0 * get_si_prefix_multiplier(prefix)));
    }

    if let Some(conversion) = unit.record("CONVERSION_BASED_UNIT") {
        // CONVERSION_BASED_UNIT(name, conversion_factor)
        let name = conversion
            .attributes
            .first()
            .and_then(|v| v.as_string())
            .unwrap_or("")
            .to_string();
        let factor_ref = conversion.attributes.get(1).and_then(|v| v.as_entity_ref());

        if let Some(factor_id) = factor_ref {
            let factor = decoder.decode_by_id(factor_id)?;
            // LENGTH_MEASURE_WITH_UNIT(value_component, unit_component)
            let value = factor.get_float(0);
            let base = match factor.get_ref(1) {
                Some(base_id) => {
                    let base = decoder.decode_by_id(base_id)?;
                    length_unit_mm(decoder, &base, depth + 1)?
                }
                None => None,
            };
            if let (Some(value), Some(base)) = (value, base) {
                return Ok(Some(value * base));
            }
        }
        return Ok(named_unit_mm(&name));
    }

    Ok(None)
}

/// Units listed by `GLOBAL_UNIT_ASSIGNED_CONTEXT` instances, in file order
fn assigned_units(decoder: &mut EntityDecoder) -> Result<Vec<u32>> {
    let mut units = Vec::new();
    for context_id in decoder.find_by_type("GLOBAL_UNIT_ASSIGNED_CONTEXT")? {
        let context = decoder.decode_by_id(context_id)?;
        if let Some(record) = context.record("GLOBAL_UNIT_ASSIGNED_CONTEXT") {
            if let Some(list) = record.attributes.first() {
                units.extend(list.ref_list());
            }
        }
    }
    Ok(units)
}

/// Extract the length unit of a STEP file as millimetres per model unit
///
/// Returns `1.0` (millimetres) when no length unit is declared.
pub fn extract_length_unit_scale(decoder: &mut EntityDecoder) -> Result<f64> {
    let mut candidates = assigned_units(decoder)?;
    if candidates.is_empty() {
        candidates = decoder.find_by_type("LENGTH_UNIT")?;
    }

    for unit_id in candidates {
        let unit = decoder.decode_by_id(unit_id)?;
        if let Some(scale) = length_unit_mm(decoder, &unit, 0)? {
            debug!(unit = unit_id, scale_mm = scale, "Resolved STEP length unit");
            return Ok(scale);
        }
    }

    Ok(1.0)
}

/// Radians per plane angle unit of a STEP file (`1.0` unless degrees are declared)
pub fn extract_plane_angle_scale(decoder: &mut EntityDecoder) -> Result<f64> {
    let mut candidates = assigned_units(decoder)?;
    if candidates.is_empty() {
        candidates = decoder.find_by_type("PLANE_ANGLE_UNIT")?;
    }
    for unit_id in candidates {
        let unit = decoder.decode_by_id(unit_id)?;
        if !unit.has_type("PLANE_ANGLE_UNIT") {
            continue;
        }
        if unit.has_type("SI_UNIT") {
            return Ok(1.0);
        }
        if let Some(conversion) = unit.record("CONVERSION_BASED_UNIT") {
            let factor = match conversion.attributes.get(1).and_then(|v| v.as_entity_ref()) {
                Some(id) => decoder.decode_by_id(id)?.get_float(0),
                None => None,
            };
            let name = conversion
                .attributes
                .first()
                .and_then(|v| v.as_string())
                .unwrap_or("")
                .to_ascii_uppercase();
            return Ok(match factor {
                // PLANE_ANGLE_MEASURE_WITH_UNIT(PLANE_ANGLE_MEASURE(0.0174532925),#rad)
                Some(f) if f > 0.0 => f,
                _ if name.starts_with("DEG") => std::f64::consts::PI / 180.0,
                _ => 1.0,
            });
        }
    }
    Ok(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_si_prefix_multipliers() {
        assert_eq!(get_si_prefix_multiplier("MILLI"), 0.001);
        assert_eq!(get_si_prefix_multiplier("CENTI"), 0.01);
        assert_eq!(get_si_prefix_multiplier("KILO"), 1000.0);
        assert_eq!(get_si_prefix_multiplier(""), 1.0);
    }

    #[test]
    fn test_millimetre_context() {
        let content = "DATA;
#1=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));
#2=(NAMED_UNIT(*)PLANE_ANGLE_UNIT()SI_UNIT($,.RADIAN.));
#3=(GEOMETRIC_REPRESENTATION_CONTEXT(3)GLOBAL_UNIT_ASSIGNED_CONTEXT((#2,#1))REPRESENTATION_CONTEXT('',''));
ENDSEC;";
        let mut decoder = EntityDecoder::new(content).unwrap();
        assert_eq!(extract_length_unit_scale(&mut decoder).unwrap(), 1.0);
    }

    #[test]
    fn test_metre_and_inch() {
        let metres = "DATA;\n#1=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT($,.METRE.));\nENDSEC;";
        let mut decoder = EntityDecoder::new(metres).unwrap();
        assert_eq!(extract_length_unit_scale(&mut decoder).unwrap(), 1000.0);

        let inches = "DATA;
#1=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));
#2=LENGTH_MEASURE_WITH_UNIT(LENGTH_MEASURE(25.4),#1);
#3=DIMENSIONAL_EXPONENTS(1.,0.,0.,0.,0.,0.,0.);
#4=(CONVERSION_BASED_UNIT('INCH',#2)LENGTH_UNIT()NAMED_UNIT(#3));
#5=(GEOMETRIC_REPRESENTATION_CONTEXT(3)GLOBAL_UNIT_ASSIGNED_CONTEXT((#4))REPRESENTATION_CONTEXT('',''));
ENDSEC;";
        let mut decoder = EntityDecoder::new(inches).unwrap();
        let scale = extract_length_unit_scale(&mut decoder).unwrap();
        assert!((scale - 25.4).abs() < 1e-12);
    }

    #[test]
    fn test_degree_plane_angle() {
        let content = "DATA;
#1=(NAMED_UNIT(*)PLANE_ANGLE_UNIT()SI_UNIT($,.RADIAN.));
#2=PLANE_ANGLE_MEASURE_WITH_UNIT(PLANE_ANGLE_MEASURE(0.0174532925199433),#1);
#3=(CONVERSION_BASED_UNIT('DEGREE',#2)NAMED_UNIT(#4)PLANE_ANGLE_UNIT());
#4=DIMENSIONAL_EXPONENTS(0.,0.,0.,0.,0.,0.,0.);
#5=(GEOMETRIC_REPRESENTATION_CONTEXT(3)GLOBAL_UNIT_ASSIGNED_CONTEXT((#3))REPRESENTATION_CONTEXT('',''));
ENDSEC;";
        let mut decoder = EntityDecoder::new(content).unwrap();
        let scale = extract_plane_angle_scale(&mut decoder).unwrap();
        assert!((scale - std::f64::consts::PI / 180.0).abs() < 1e-12);

        let radians = "DATA;\n#1=(NAMED_UNIT(*)PLANE_ANGLE_UNIT()SI_UNIT($,.RADIAN.));\nENDSEC;";
        let mut decoder = EntityDecoder::new(radians).unwrap();
        assert_eq!(extract_plane_angle_scale(&mut decoder).unwrap(), 1.0);
    }

    #[test]
    fn test_default_is_millimetres() {
        let mut decoder = EntityDecoder::new("DATA;\n#1=DIRECTION('',(1.,0.,0.));\nENDSEC;").unwrap();
        assert_eq!(extract_length_unit_scale(&mut decoder).unwrap(), 1.0);
    }
}
