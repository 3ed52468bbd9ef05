//! The Z80 encoding table (spec §4.F): one entry per instruction shape,
//! tried in order, first all-accepting entry wins. Adding a form is
//! appending a row here, not touching [`super::encode_one`].

use super::{AsmOp, EncodeError, Expr, Operand, OperandPattern, RegConstraint};

type Encoder = Box<dyn Fn(&[Operand]) -> Result<Vec<u8>, EncodeError> + Send + Sync>;
type Decoder = Box<dyn Fn(&[u8]) -> Option<(Vec<Operand>, usize)> + Send + Sync>;

pub struct TableEntry {
    pub mnemonic: &'static str,
    pub pattern: Vec<OperandPattern>,
    pub len: usize,
    pub encode: Encoder,
    pub decode: Decoder,
}

const R: RegConstraint = RegConstraint::Any;

fn reg8_index(name: &str) -> Option<u8> {
    Some(match name {
        "B" => 0,
        "C" => 1,
        "D" => 2,
        "E" => 3,
        "H" => 4,
        "L" => 5,
        "A" => 7,
        _ => return None,
    })
}

fn index_to_reg8(i: u8) -> Option<&'static str> {
    Some(match i {
        0 => "B",
        1 => "C",
        2 => "D",
        3 => "E",
        4 => "H",
        5 => "L",
        7 => "A",
        _ => return None,
    })
}

fn pair_index(name: &str) -> Option<u8> {
    Some(match name {
        "BC" => 0,
        "DE" => 1,
        "HL" => 2,
        "SP" => 3,
        _ => return None,
    })
}

fn index_to_pair(i: u8) -> Option<&'static str> {
    Some(match i {
        0 => "BC",
        1 => "DE",
        2 => "HL",
        3 => "SP",
        _ => return None,
    })
}

fn pair2_index(name: &str) -> Option<u8> {
    Some(match name {
        "BC" => 0,
        "DE" => 1,
        "HL" => 2,
        "AF" => 3,
        _ => return None,
    })
}

fn index_to_pair2(i: u8) -> Option<&'static str> {
    Some(match i {
        0 => "BC",
        1 => "DE",
        2 => "HL",
        3 => "AF",
        _ => return None,
    })
}

fn cc_index(name: &str) -> Option<u8> {
    Some(match name {
        "NZ" => 0,
        "Z" => 1,
        "NC" => 2,
        "C" => 3,
        "PO" => 4,
        "PE" => 5,
        "P" => 6,
        "M" => 7,
        _ => return None,
    })
}

fn index_to_cc(i: u8) -> Option<&'static str> {
    Some(match i {
        0 => "NZ",
        1 => "Z",
        2 => "NC",
        3 => "C",
        4 => "PO",
        5 => "PE",
        6 => "P",
        7 => "M",
        _ => return None,
    })
}

fn cc2_index(name: &str) -> Option<u8> {
    Some(match name {
        "NZ" => 0,
        "Z" => 1,
        "NC" => 2,
        "C" => 3,
        _ => return None,
    })
}

fn index_to_cc2(i: u8) -> Option<&'static str> {
    Some(match i {
        0 => "NZ",
        1 => "Z",
        2 => "NC",
        3 => "C",
        _ => return None,
    })
}

fn as_i64(e: &Expr) -> Result<i64, EncodeError> {
    match e {
        Expr::Const(n) => Ok(*n),
        other => Err(EncodeError::Decode(format!("expected a resolved immediate, got `{}`", other))),
    }
}

macro_rules! entry {
    ($mnemonic:literal, $pattern:expr, $len:expr, $encode:expr, $decode:expr) => {
        TableEntry {
            mnemonic: $mnemonic,
            pattern: $pattern,
            len: $len,
            encode: Box::new($encode),
            decode: Box::new($decode),
        }
    };
}

pub fn entries() -> Vec<TableEntry> {
    vec![
        entry!("NOP", vec![], 1, |_| Ok(vec![0x00]), |b| (b.first() == Some(&0x00)).then(|| (vec![], 1))),
        entry!("HALT", vec![], 1, |_| Ok(vec![0x76]), |b| (b.first() == Some(&0x76)).then(|| (vec![], 1))),
        entry!("DI", vec![], 1, |_| Ok(vec![0xF3]), |b| (b.first() == Some(&0xF3)).then(|| (vec![], 1))),
        entry!("EI", vec![], 1, |_| Ok(vec![0xFB]), |b| (b.first() == Some(&0xFB)).then(|| (vec![], 1))),
        entry!("EXX", vec![], 1, |_| Ok(vec![0xD9]), |b| (b.first() == Some(&0xD9)).then(|| (vec![], 1))),
        entry!(
            "EX",
            vec![OperandPattern::Reg16(RegConstraint::Exact("AF")), OperandPattern::Reg16(RegConstraint::Exact("AF'"))],
            1,
            |_| Ok(vec![0x08]),
            |b| (b.first() == Some(&0x08)).then(|| (vec![Operand::Reg16("AF"), Operand::Reg16("AF'")], 1))
        ),
        entry!("RET", vec![], 1, |_| Ok(vec![0xC9]), |b| (b.first() == Some(&0xC9)).then(|| (vec![], 1))),
        entry!(
            "RET",
            vec![OperandPattern::Cond(R)],
            1,
            |ops| match ops {
                [Operand::Cond(cc)] => Ok(vec![0xC0 | (cc_index(cc).unwrap() << 3)]),
                _ => Err(EncodeError::NoMatch("RET cc".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xC7 == 0xC0 {
                    let cc = index_to_cc((op >> 3) & 0x07)?;
                    Some((vec![Operand::Cond(cc)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "PUSH",
            vec![OperandPattern::Reg16(R)],
            1,
            |ops| match ops {
                [Operand::Reg16(r)] => Ok(vec![0xC5 | (pair2_index(r).ok_or_else(|| bad_reg(r))? << 4)]),
                _ => Err(EncodeError::NoMatch("PUSH".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xCF == 0xC5 {
                    let r = index_to_pair2((op >> 4) & 0x03)?;
                    Some((vec![Operand::Reg16(r)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "POP",
            vec![OperandPattern::Reg16(R)],
            1,
            |ops| match ops {
                [Operand::Reg16(r)] => Ok(vec![0xC1 | (pair2_index(r).ok_or_else(|| bad_reg(r))? << 4)]),
                _ => Err(EncodeError::NoMatch("POP".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xCF == 0xC1 {
                    let r = index_to_pair2((op >> 4) & 0x03)?;
                    Some((vec![Operand::Reg16(r)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::Reg8(R), OperandPattern::Reg8(R)],
            1,
            |ops| match ops {
                [Operand::Reg8(d), Operand::Reg8(s)] => {
                    let d = reg8_index(d).ok_or_else(|| bad_reg(d))?;
                    let s = reg8_index(s).ok_or_else(|| bad_reg(s))?;
                    Ok(vec![0x40 | (d << 3) | s])
                }
                _ => Err(EncodeError::NoMatch("LD r,r'".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xC0 == 0x40 && op != 0x76 {
                    let d = index_to_reg8((op >> 3) & 0x07)?;
                    let s = index_to_reg8(op & 0x07)?;
                    Some((vec![Operand::Reg8(d), Operand::Reg8(s)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::Reg8(R), OperandPattern::Imm8],
            2,
            |ops| match ops {
                [Operand::Reg8(d), Operand::Imm8(e)] => {
                    let d = reg8_index(d).ok_or_else(|| bad_reg(d))?;
                    Ok(vec![0x06 | (d << 3), as_i64(e)? as u8])
                }
                _ => Err(EncodeError::NoMatch("LD r,n".into())),
            },
            |b| {
                if b.len() < 2 {
                    return None;
                }
                let op = b[0];
                if op & 0xC7 == 0x06 && op != 0x36 {
                    let d = index_to_reg8((op >> 3) & 0x07)?;
                    Some((vec![Operand::Reg8(d), Operand::Imm8(Expr::Const(b[1] as i64))], 2))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::Reg16(R), OperandPattern::Imm16],
            3,
            |ops| match ops {
                [Operand::Reg16(r), Operand::Imm16(e)] => {
                    let p = pair_index(r).ok_or_else(|| bad_reg(r))?;
                    let v = as_i64(e)? as u16;
                    Ok(vec![0x01 | (p << 4), (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("LD rr,nn".into())),
            },
            |b| {
                if b.len() < 3 {
                    return None;
                }
                let op = b[0];
                if op & 0xCF == 0x01 {
                    let r = index_to_pair((op >> 4) & 0x03)?;
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::Reg16(r), Operand::Imm16(Expr::Const(v as i64))], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::Reg8(R), OperandPattern::IndReg(RegConstraint::Exact("HL"))],
            1,
            |ops| match ops {
                [Operand::Reg8(d), Operand::IndReg("HL")] => {
                    let d = reg8_index(d).ok_or_else(|| bad_reg(d))?;
                    Ok(vec![0x46 | (d << 3)])
                }
                _ => Err(EncodeError::NoMatch("LD r,(HL)".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xC7 == 0x46 {
                    let d = index_to_reg8((op >> 3) & 0x07)?;
                    Some((vec![Operand::Reg8(d), Operand::IndReg("HL")], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::IndReg(RegConstraint::Exact("HL")), OperandPattern::Reg8(R)],
            1,
            |ops| match ops {
                [Operand::IndReg("HL"), Operand::Reg8(s)] => {
                    let s = reg8_index(s).ok_or_else(|| bad_reg(s))?;
                    Ok(vec![0x70 | s])
                }
                _ => Err(EncodeError::NoMatch("LD (HL),r".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xF8 == 0x70 && op != 0x76 {
                    let s = index_to_reg8(op & 0x07)?;
                    Some((vec![Operand::IndReg("HL"), Operand::Reg8(s)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::Reg8(RegConstraint::Exact("A")), OperandPattern::IndImm],
            3,
            |ops| match ops {
                [Operand::Reg8("A"), Operand::IndImm(e)] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0x3A, (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("LD A,(nn)".into())),
            },
            |b| {
                if b.len() >= 3 && b[0] == 0x3A {
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::Reg8("A"), Operand::IndImm(Expr::Const(v as i64))], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::IndImm, OperandPattern::Reg8(RegConstraint::Exact("A"))],
            3,
            |ops| match ops {
                [Operand::IndImm(e), Operand::Reg8("A")] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0x32, (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("LD (nn),A".into())),
            },
            |b| {
                if b.len() >= 3 && b[0] == 0x32 {
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::IndImm(Expr::Const(v as i64)), Operand::Reg8("A")], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::Reg16(RegConstraint::Exact("HL")), OperandPattern::IndImm],
            3,
            |ops| match ops {
                [Operand::Reg16("HL"), Operand::IndImm(e)] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0x2A, (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("LD HL,(nn)".into())),
            },
            |b| {
                if b.len() >= 3 && b[0] == 0x2A {
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::Reg16("HL"), Operand::IndImm(Expr::Const(v as i64))], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "LD",
            vec![OperandPattern::IndImm, OperandPattern::Reg16(RegConstraint::Exact("HL"))],
            3,
            |ops| match ops {
                [Operand::IndImm(e), Operand::Reg16("HL")] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0x22, (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("LD (nn),HL".into())),
            },
            |b| {
                if b.len() >= 3 && b[0] == 0x22 {
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::IndImm(Expr::Const(v as i64)), Operand::Reg16("HL")], 3))
                } else {
                    None
                }
            }
        ),
        accum_reg_entry("ADD", 0x80),
        accum_imm_entry("ADD", 0xC6),
        accum_reg_entry("SUB", 0x90),
        accum_imm_entry("SUB", 0xD6),
        accum_reg_entry("AND", 0xA0),
        accum_imm_entry("AND", 0xE6),
        accum_reg_entry("XOR", 0xA8),
        accum_imm_entry("XOR", 0xEE),
        accum_reg_entry("OR", 0xB0),
        accum_imm_entry("OR", 0xF6),
        accum_reg_entry("CP", 0xB8),
        accum_imm_entry("CP", 0xFE),
        entry!(
            "ADD",
            vec![OperandPattern::Reg16(RegConstraint::Exact("HL")), OperandPattern::Reg16(R)],
            1,
            |ops| match ops {
                [Operand::Reg16("HL"), Operand::Reg16(r)] => {
                    let p = pair_index(r).ok_or_else(|| bad_reg(r))?;
                    Ok(vec![0x09 | (p << 4)])
                }
                _ => Err(EncodeError::NoMatch("ADD HL,rr".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xCF == 0x09 {
                    let r = index_to_pair((op >> 4) & 0x03)?;
                    Some((vec![Operand::Reg16("HL"), Operand::Reg16(r)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "SBC",
            vec![OperandPattern::Reg16(RegConstraint::Exact("HL")), OperandPattern::Reg16(R)],
            2,
            |ops| match ops {
                [Operand::Reg16("HL"), Operand::Reg16(r)] => {
                    let p = pair_index(r).ok_or_else(|| bad_reg(r))?;
                    Ok(vec![0xED, 0x42 | (p << 4)])
                }
                _ => Err(EncodeError::NoMatch("SBC HL,rr".into())),
            },
            |b| {
                if b.len() < 2 || b[0] != 0xED {
                    return None;
                }
                if b[1] & 0xCF == 0x42 {
                    let r = index_to_pair((b[1] >> 4) & 0x03)?;
                    Some((vec![Operand::Reg16("HL"), Operand::Reg16(r)], 2))
                } else {
                    None
                }
            }
        ),
        entry!(
            "INC",
            vec![OperandPattern::Reg8(R)],
            1,
            |ops| match ops {
                [Operand::Reg8(r)] => Ok(vec![0x04 | (reg8_index(r).ok_or_else(|| bad_reg(r))? << 3)]),
                _ => Err(EncodeError::NoMatch("INC r".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xC7 == 0x04 {
                    let r = index_to_reg8((op >> 3) & 0x07)?;
                    Some((vec![Operand::Reg8(r)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "DEC",
            vec![OperandPattern::Reg8(R)],
            1,
            |ops| match ops {
                [Operand::Reg8(r)] => Ok(vec![0x05 | (reg8_index(r).ok_or_else(|| bad_reg(r))? << 3)]),
                _ => Err(EncodeError::NoMatch("DEC r".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xC7 == 0x05 {
                    let r = index_to_reg8((op >> 3) & 0x07)?;
                    Some((vec![Operand::Reg8(r)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "INC",
            vec![OperandPattern::Reg16(R)],
            1,
            |ops| match ops {
                [Operand::Reg16(r)] => Ok(vec![0x03 | (pair_index(r).ok_or_else(|| bad_reg(r))? << 4)]),
                _ => Err(EncodeError::NoMatch("INC rr".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xCF == 0x03 {
                    let r = index_to_pair((op >> 4) & 0x03)?;
                    Some((vec![Operand::Reg16(r)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "DEC",
            vec![OperandPattern::Reg16(R)],
            1,
            |ops| match ops {
                [Operand::Reg16(r)] => Ok(vec![0x0B | (pair_index(r).ok_or_else(|| bad_reg(r))? << 4)]),
                _ => Err(EncodeError::NoMatch("DEC rr".into())),
            },
            |b| {
                let op = *b.first()?;
                if op & 0xCF == 0x0B {
                    let r = index_to_pair((op >> 4) & 0x03)?;
                    Some((vec![Operand::Reg16(r)], 1))
                } else {
                    None
                }
            }
        ),
        entry!(
            "JP",
            vec![OperandPattern::Imm16],
            3,
            |ops| match ops {
                [Operand::Imm16(e)] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0xC3, (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("JP nn".into())),
            },
            |b| {
                if b.len() >= 3 && b[0] == 0xC3 {
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::Imm16(Expr::Const(v as i64))], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "JP",
            vec![OperandPattern::Cond(R), OperandPattern::Imm16],
            3,
            |ops| match ops {
                [Operand::Cond(cc), Operand::Imm16(e)] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0xC2 | (cc_index(cc).unwrap() << 3), (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("JP cc,nn".into())),
            },
            |b| {
                if b.len() < 3 {
                    return None;
                }
                let op = b[0];
                if op & 0xC7 == 0xC2 {
                    let cc = index_to_cc((op >> 3) & 0x07)?;
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::Cond(cc), Operand::Imm16(Expr::Const(v as i64))], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "JP",
            vec![OperandPattern::IndReg(RegConstraint::Exact("HL"))],
            1,
            |_| Ok(vec![0xE9]),
            |b| (b.first() == Some(&0xE9)).then(|| (vec![Operand::IndReg("HL")], 1))
        ),
        entry!(
            "CALL",
            vec![OperandPattern::Imm16],
            3,
            |ops| match ops {
                [Operand::Imm16(e)] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0xCD, (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("CALL nn".into())),
            },
            |b| {
                if b.len() >= 3 && b[0] == 0xCD {
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::Imm16(Expr::Const(v as i64))], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "CALL",
            vec![OperandPattern::Cond(R), OperandPattern::Imm16],
            3,
            |ops| match ops {
                [Operand::Cond(cc), Operand::Imm16(e)] => {
                    let v = as_i64(e)? as u16;
                    Ok(vec![0xC4 | (cc_index(cc).unwrap() << 3), (v & 0xFF) as u8, (v >> 8) as u8])
                }
                _ => Err(EncodeError::NoMatch("CALL cc,nn".into())),
            },
            |b| {
                if b.len() < 3 {
                    return None;
                }
                let op = b[0];
                if op & 0xC7 == 0xC4 {
                    let cc = index_to_cc((op >> 3) & 0x07)?;
                    let v = u16::from_le_bytes([b[1], b[2]]);
                    Some((vec![Operand::Cond(cc), Operand::Imm16(Expr::Const(v as i64))], 3))
                } else {
                    None
                }
            }
        ),
        entry!(
            "JR",
            vec![OperandPattern::Relative],
            2,
            |ops| match ops {
                [Operand::Relative(e)] => Ok(vec![0x18, as_i64(e)? as i8 as u8]),
                _ => Err(EncodeError::NoMatch("JR e".into())),
            },
            |b| {
                if b.len() >= 2 && b[0] == 0x18 {
                    Some((vec![Operand::Relative(Expr::Const(b[1] as i8 as i64))], 2))
                } else {
                    None
                }
            }
        ),
        entry!(
            "JR",
            vec![OperandPattern::Cond(R), OperandPattern::Relative],
            2,
            |ops| match ops {
                [Operand::Cond(cc), Operand::Relative(e)] => {
                    let idx = cc2_index(cc).ok_or_else(|| bad_reg(cc))?;
                    Ok(vec![0x20 | (idx << 3), as_i64(e)? as i8 as u8])
                }
                _ => Err(EncodeError::NoMatch("JR cc,e".into())),
            },
            |b| {
                if b.len() < 2 {
                    return None;
                }
                let op = b[0];
                if op & 0xE7 == 0x20 {
                    let cc = index_to_cc2((op >> 3) & 0x03)?;
                    Some((vec![Operand::Cond(cc), Operand::Relative(Expr::Const(b[1] as i8 as i64))], 2))
                } else {
                    None
                }
            }
        ),
        entry!(
            "DJNZ",
            vec![OperandPattern::Relative],
            2,
            |ops| match ops {
                [Operand::Relative(e)] => Ok(vec![0x10, as_i64(e)? as i8 as u8]),
                _ => Err(EncodeError::NoMatch("DJNZ e".into())),
            },
            |b| {
                if b.len() >= 2 && b[0] == 0x10 {
                    Some((vec![Operand::Relative(Expr::Const(b[1] as i8 as i64))], 2))
                } else {
                    None
                }
            }
        ),
        entry!(
            "IN",
            vec![OperandPattern::Reg8(RegConstraint::Exact("A")), OperandPattern::IndImm],
            2,
            |ops| match ops {
                [Operand::Reg8("A"), Operand::IndImm(e)] => Ok(vec![0xDB, as_i64(e)? as u8]),
                _ => Err(EncodeError::NoMatch("IN A,(n)".into())),
            },
            |b| {
                if b.len() >= 2 && b[0] == 0xDB {
                    Some((vec![Operand::Reg8("A"), Operand::IndImm(Expr::Const(b[1] as i64))], 2))
                } else {
                    None
                }
            }
        ),
        entry!(
            "OUT",
            vec![OperandPattern::IndImm, OperandPattern::Reg8(RegConstraint::Exact("A"))],
            2,
            |ops| match ops {
                [Operand::IndImm(e), Operand::Reg8("A")] => Ok(vec![0xD3, as_i64(e)? as u8]),
                _ => Err(EncodeError::NoMatch("OUT (n),A".into())),
            },
            |b| {
                if b.len() >= 2 && b[0] == 0xD3 {
                    Some((vec![Operand::IndImm(Expr::Const(b[1] as i64)), Operand::Reg8("A")], 2))
                } else {
                    None
                }
            }
        ),
    ]
}

/// `ADD/SUB/AND/XOR/OR/CP A,r` — the register form of an accumulator op;
/// `reg_base | reg8_index(r)` selects the source register.
fn accum_reg_entry(mnemonic: &'static str, reg_base: u8) -> TableEntry {
    TableEntry {
        mnemonic,
        pattern: vec![OperandPattern::Reg8(RegConstraint::Exact("A")), OperandPattern::Reg8(R)],
        len: 1,
        encode: Box::new(move |ops: &[Operand]| match ops {
            [Operand::Reg8("A"), Operand::Reg8(r)] => Ok(vec![reg_base | reg8_index(r).ok_or_else(|| bad_reg(r))?]),
            _ => Err(EncodeError::NoMatch(mnemonic.into())),
        }),
        decode: Box::new(move |b: &[u8]| {
            let op = *b.first()?;
            if op & 0xF8 != reg_base {
                return None;
            }
            let r = index_to_reg8(op & 0x07)?;
            Some((vec![Operand::Reg8("A"), Operand::Reg8(r)], 1))
        }),
    }
}

/// `ADD/SUB/AND/XOR/OR/CP A,n` — the immediate form, one fixed opcode byte
/// per mnemonic followed by the literal.
fn accum_imm_entry(mnemonic: &'static str, imm_opcode: u8) -> TableEntry {
    TableEntry {
        mnemonic,
        pattern: vec![OperandPattern::Reg8(RegConstraint::Exact("A")), OperandPattern::Imm8],
        len: 2,
        encode: Box::new(move |ops: &[Operand]| match ops {
            [Operand::Reg8("A"), Operand::Imm8(e)] => Ok(vec![imm_opcode, as_i64(e)? as u8]),
            _ => Err(EncodeError::NoMatch(mnemonic.into())),
        }),
        decode: Box::new(move |b: &[u8]| {
            if b.len() >= 2 && b[0] == imm_opcode {
                Some((vec![Operand::Reg8("A"), Operand::Imm8(Expr::Const(b[1] as i64))], 2))
            } else {
                None
            }
        }),
    }
}

fn bad_reg(name: &str) -> EncodeError {
    EncodeError::Decode(format!("`{}` is not a valid register operand here", name))
}

pub fn find(op: &AsmOp) -> Result<&'static TableEntry, EncodeError> {
    static TABLE: std::sync::OnceLock<Vec<TableEntry>> = std::sync::OnceLock::new();
    let table = TABLE.get_or_init(entries);
    table
        .iter()
        .find(|e| e.mnemonic == op.mnemonic && e.pattern.len() == op.operands.len() && op.operands.iter().zip(&e.pattern).all(|(o, p)| o.matches(p)))
        .ok_or_else(|| EncodeError::NoMatch(op.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<(AsmOp, usize), EncodeError> {
    static TABLE: std::sync::OnceLock<Vec<TableEntry>> = std::sync::OnceLock::new();
    let table = TABLE.get_or_init(entries);
    for entry in table {
        if let Some((operands, len)) = (entry.decode)(bytes) {
            return Ok((AsmOp::new(entry.mnemonic, operands), len));
        }
    }
    Err(EncodeError::Decode(format!("no table entry decodes byte {:#04x}", bytes.first().copied().unwrap_or(0))))
}
