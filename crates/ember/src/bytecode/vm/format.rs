//! `FORMAT_VALUE` and `BUILD_STRING`, the two halves of an f-string.
//!
//! Builtin values are formatted with a subset of the format-spec mini-language: fill,
//! alignment, sign, zero padding, width, precision and the `d`, `f`, `e`, `%`, `s`, `x`,
//! `o`, `b` presentation types. Instances of user classes go through `__format__`.

use super::VM;
use crate::{
    args::CallArgs,
    bytecode::op::format_value,
    exception_private::{ExcType, RunResult},
    heap::DropWithHeap,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::allocate_str,
    value::{Value, float_repr},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VM<'_, T, P, Tr> {
    /// `FORMAT_VALUE`: applies the conversion, then the format spec.
    pub(super) fn format_value(&mut self, value: Value, conversion: u32, spec: Option<Value>) -> RunResult<Value> {
        let converted = match conversion {
            format_value::STR => Some(self.str_value(&value)),
            format_value::REPR => Some(self.repr_value(&value)),
            format_value::ASCII => Some(self.repr_value(&value).map(|text| ascii_escape(&text))),
            _ => None,
        };
        let value = match converted {
            Some(text) => {
                value.drop_with_heap(self.heap);
                match text {
                    Ok(text) => allocate_str(self.heap, text)?,
                    Err(err) => {
                        spec.drop_with_heap(self.heap);
                        return Err(err);
                    }
                }
            }
            None => value,
        };

        let spec_text = match &spec {
            None => Ok(String::new()),
            Some(spec) => match spec.as_str(self.heap, self.interns) {
                Some(text) => Ok(text.to_owned()),
                None => Err(format!("format spec must be a str, not {}", spec.type_name(self.heap))),
            },
        };
        spec.drop_with_heap(self.heap);
        let spec_text = match spec_text {
            Ok(text) => text,
            Err(msg) => {
                value.drop_with_heap(self.heap);
                return Err(ExcType::type_error(msg));
            }
        };

        if spec_text.is_empty() && value.as_str(self.heap, self.interns).is_some() {
            return Ok(value);
        }
        let formatted = self.format(&value, &spec_text);
        value.drop_with_heap(self.heap);
        formatted
    }

    /// `format(value, spec)` as a new str value.
    fn format(&mut self, value: &Value, spec: &str) -> RunResult<Value> {
        if let Some(method) = self.lookup_special(value, "__format__")? {
            let spec = allocate_str(self.heap, spec)?;
            let result = self.call_value(method, CallArgs::positional([spec]))?;
            if result.as_str(self.heap, self.interns).is_none() {
                let msg = format!("__format__ must return a str, not {}", result.type_name(self.heap));
                result.drop_with_heap(self.heap);
                return Err(ExcType::type_error(msg));
            }
            return Ok(result);
        }
        let text = if spec.is_empty() {
            self.str_value(value)?
        } else {
            let plain = match value {
                Value::Int(_) | Value::Bool(_) | Value::Float(_) => None,
                _ if value.as_bigint(self.heap).is_some() => None,
                _ => Some(self.str_value(value)?),
            };
            format_with_spec(value, plain, spec, self)?
        };
        allocate_str(self.heap, text)
    }

    /// `BUILD_STRING`: concatenates the formatted pieces.
    pub(super) fn build_string(&mut self, parts: Vec<Value>) -> RunResult<Value> {
        let mut joined = String::new();
        let mut failed = None;
        for part in &parts {
            match part.as_str(self.heap, self.interns) {
                Some(text) => joined.push_str(text),
                None => {
                    failed = Some(part.type_name(self.heap).into_owned());
                    break;
                }
            }
        }
        parts.drop_with_heap(self.heap);
        if let Some(type_name) = failed {
            return Err(ExcType::system_error(format!("BUILD_STRING got a {type_name}, not a str")));
        }
        allocate_str(self.heap, joined)
    }
}

/// A parsed `[[fill]align][sign][0][width][.precision][type]` spec.
#[derive(Debug, Clone, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> RunResult<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = Self::default();
        let mut i = 0;
        if chars.len() >= 2 && "<>=^".contains(chars[1]) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().is_some_and(|c| "<>=^".contains(*c)) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i)
            && "+- ".contains(c)
        {
            parsed.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'0') && parsed.align.is_none() {
            parsed.fill = Some('0');
            parsed.align = Some('=');
            i += 1;
        }
        let (width, next) = digits(&chars, i);
        parsed.width = width.unwrap_or(0);
        i = next;
        if chars.get(i) == Some(&'.') {
            let (precision, next) = digits(&chars, i + 1);
            if precision.is_none() {
                return Err(ExcType::value_error("Format specifier missing precision"));
            }
            parsed.precision = precision;
            i = next;
        }
        parsed.kind = chars.get(i).copied();
        if chars.len() > i + 1 {
            return Err(ExcType::value_error("Invalid format specifier"));
        }
        Ok(parsed)
    }
}

fn digits(chars: &[char], start: usize) -> (Option<usize>, usize) {
    let end = chars[start.min(chars.len())..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map_or(chars.len(), |offset| start + offset);
    if end <= start {
        return (None, start);
    }
    let text: String = chars[start..end].iter().collect();
    (text.parse().ok(), end)
}

/// Formats a builtin value. `plain` is the `str()` of non-numeric values.
fn format_with_spec<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    value: &Value,
    plain: Option<String>,
    spec: &str,
    vm: &VM<'_, T, P, Tr>,
) -> RunResult<String> {
    let parsed = FormatSpec::parse(spec)?;
    let type_name = value.type_name(vm.heap);
    let unknown = |kind: char| {
        ExcType::value_error(format!("Unknown format code '{kind}' for object of type '{type_name}'"))
    };

    if let Some(text) = plain {
        if let Some(kind) = parsed.kind.filter(|kind| *kind != 's') {
            return Err(unknown(kind));
        }
        if parsed.sign.is_some() {
            return Err(ExcType::value_error("Sign not allowed in string format specifier"));
        }
        let text = match parsed.precision {
            Some(precision) => text.chars().take(precision).collect(),
            None => text,
        };
        return Ok(pad(&text, &parsed, '<'));
    }

    let (negative, digits) = match parsed.kind {
        None | Some('d' | 'n' | 'x' | 'X' | 'o' | 'b') if !matches!(value, Value::Float(_)) => {
            let Some(number) = value.as_bigint(vm.heap) else {
                return Err(unknown(parsed.kind.unwrap_or('d')));
            };
            if parsed.precision.is_some() {
                return Err(ExcType::value_error("Precision not allowed in integer format specifier"));
            }
            let magnitude = number.magnitude();
            let digits = match parsed.kind {
                Some('x') => magnitude.to_str_radix(16),
                Some('X') => magnitude.to_str_radix(16).to_uppercase(),
                Some('o') => magnitude.to_str_radix(8),
                Some('b') => magnitude.to_str_radix(2),
                _ => magnitude.to_string(),
            };
            (number.sign() == num_bigint::Sign::Minus, digits)
        }
        None | Some('f' | 'F' | 'e' | 'E' | '%' | 'g' | 'G') => {
            let Some(number) = value.as_f64(vm.heap) else {
                return Err(unknown(parsed.kind.unwrap_or('f')));
            };
            let negative = number.is_sign_negative() && !number.is_nan();
            let number = number.abs();
            let digits = match (parsed.kind, parsed.precision) {
                (Some('f' | 'F'), precision) => format!("{:.*}", precision.unwrap_or(6), number),
                (Some('e' | 'E'), precision) => exponent_form(number, precision.unwrap_or(6), parsed.kind == Some('E')),
                (Some('%'), precision) => format!("{:.*}%", precision.unwrap_or(6), number * 100.0),
                (_, Some(precision)) => general_form(number, precision.max(1)),
                (_, None) => float_repr(number),
            };
            (negative, digits)
        }
        Some(kind) => return Err(unknown(kind)),
    };

    let sign = match (negative, parsed.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    };
    if parsed.align == Some('=') {
        let fill = parsed.fill.unwrap_or(' ');
        let padding = parsed.width.saturating_sub(sign.len() + digits.chars().count());
        return Ok(format!("{sign}{}{digits}", fill.to_string().repeat(padding)));
    }
    Ok(pad(&format!("{sign}{digits}"), &parsed, '>'))
}

/// Pads `text` to the spec's width with its fill and alignment.
fn pad(text: &str, spec: &FormatSpec, default_align: char) -> String {
    let len = text.chars().count();
    if len >= spec.width {
        return text.to_owned();
    }
    let fill = spec.fill.unwrap_or(' ').to_string();
    let padding = spec.width - len;
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{text}{}", fill.repeat(padding)),
        '^' => format!("{}{text}{}", fill.repeat(padding / 2), fill.repeat(padding - padding / 2)),
        _ => format!("{}{text}", fill.repeat(padding)),
    }
}

/// `1.500000e+03` style: at least two exponent digits, explicit exponent sign.
fn exponent_form(number: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{number:.precision$e}");
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    let marker = if upper { 'E' } else { 'e' };
    format!("{mantissa}{marker}{sign}{digits:0>2}")
}

/// `g` style with an explicit precision: significant digits, trailing zeros dropped.
fn general_form(number: f64, precision: usize) -> String {
    if number == 0.0 {
        return "0".to_owned();
    }
    #[expect(clippy::cast_possible_truncation)]
    let exponent = number.log10().floor() as i64;
    let precision_i64 = i64::try_from(precision).unwrap_or(i64::MAX);
    if exponent < -4 || exponent >= precision_i64 {
        let text = exponent_form(number, precision - 1, false);
        let (mantissa, rest) = text.split_once('e').unwrap_or((text.as_str(), ""));
        let mantissa = trim_fraction(mantissa);
        return format!("{mantissa}e{rest}");
    }
    let decimals = usize::try_from(precision_i64 - 1 - exponent).unwrap_or(0);
    trim_fraction(&format!("{number:.decimals$}")).to_owned()
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// `ascii()`: escapes every non-ASCII character of a repr.
fn ascii_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let code = u32::from(c);
        match code {
            0..=0x7f => out.push(c),
            0x80..=0xff => out.push_str(&format!("\\x{code:02x}")),
            0x100..=0xffff => out.push_str(&format!("\\u{code:04x}")),
            _ => out.push_str(&format!("\\U{code:08x}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parsing_reads_every_field() {
        let spec = FormatSpec::parse("*^+10.3f").unwrap();
        assert_eq!(
            spec,
            FormatSpec {
                fill: Some('*'),
                align: Some('^'),
                sign: Some('+'),
                width: 10,
                precision: Some(3),
                kind: Some('f'),
            }
        );
        assert!(FormatSpec::parse("10.f").is_err(), "a dot needs digits after it");
        assert!(FormatSpec::parse("dd").is_err(), "only one presentation type");
    }

    #[test]
    fn padding_follows_alignment() {
        let spec = FormatSpec::parse("^7").unwrap();
        assert_eq!(pad("abc", &spec, '<'), "  abc  ");
        let spec = FormatSpec::parse("-<5").unwrap();
        assert_eq!(pad("ab", &spec, '>'), "ab---");
    }

    #[test]
    fn float_forms_match_python() {
        assert_eq!(exponent_form(1500.0, 2, false), "1.50e+03");
        assert_eq!(exponent_form(0.000_12, 1, true), "1.2E-04");
        assert_eq!(general_form(1234.5, 3), "1.23e+03");
        assert_eq!(general_form(0.5, 3), "0.5");
    }

    #[test]
    fn ascii_escapes_by_code_point_width() {
        assert_eq!(ascii_escape("'é✓𝄞'"), "'\\xe9\\u2713\\U0001d11e'");
    }
}
