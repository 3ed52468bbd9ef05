//! Runtime support routines and tree shaking (spec §4.E.6, §6).
//!
//! Every routine here is emitted into the final assembly only if some
//! emitted `CALL` actually named it (or named a routine that itself calls
//! it) — [`shake`] computes that fixed-point closure once code generation
//! for every function has recorded which symbols it referenced.

use crate::config::Target;
use crate::encoder::{AsmItem, Directive};
use std::collections::{HashMap, HashSet};

/// One runtime helper: its body, plus the symbols *it* calls, so
/// [`shake`] can follow transitive dependencies (e.g. `__divmod16` calling
/// `print_u16_decimal`'s shared remainder routine).
pub struct Routine {
    pub name: &'static str,
    pub body: Vec<AsmItem>,
    pub calls: &'static [&'static str],
}

/// A small number of runtime bodies are easiest to keep as literal
/// assembly text rather than re-deriving them through the structured
/// `AsmOp`/`Operand` model built for compiler-generated code; they are
/// printed verbatim, never round-tripped through the encoder. `name` is
/// the label the body starts with.
fn raw(name: &'static str, text: &str) -> Vec<AsmItem> {
    vec![AsmItem::Directive(Directive::Raw(format!("{}:\n{}", name, text)))]
}

/// All routines this backend knows how to emit, keyed by name. Bodies are
/// written as raw assembly text (see [`raw`]) since they're hand-tuned
/// Z80 idiom rather than anything selected from MIR.
pub fn catalog() -> HashMap<&'static str, Routine> {
    let mut m = HashMap::new();
    m.insert(
        "__mul8",
        Routine {
            name: "__mul8",
            body: raw(
                "__mul8",
                "    ; A = A * E, 8-bit, result truncated mod 256\n    LD D, A\n    LD A, 0\n    LD B, 8\n.mul8_loop:\n    SRL E\n    JR NC, .mul8_skip\n    ADD A, D\n.mul8_skip:\n    SLA D\n    DJNZ .mul8_loop\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "__mul16",
        Routine {
            name: "__mul16",
            body: raw(
                "__mul16",
                "    ; HL = HL * DE, 16-bit, result truncated mod 65536\n    LD B, H\n    LD C, L\n    LD HL, 0\n    LD A, 16\n.mul16_loop:\n    ADD HL, HL\n    EX DE, HL\n    ADD HL, HL\n    EX DE, HL\n    JR NC, .mul16_skip\n    ADD HL, BC\n.mul16_skip:\n    DEC A\n    JR NZ, .mul16_loop\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "__divmod8",
        Routine {
            name: "__divmod8",
            body: raw(
                "__divmod8",
                "    ; A = A / E, B = A % E (unsigned 8-bit)\n    LD B, 0\n    LD D, A\n    LD A, 0\n    LD C, 8\n.divmod8_loop:\n    SLA D\n    RLA\n    CP E\n    JR C, .divmod8_skip\n    SUB E\n    INC D\n.divmod8_skip:\n    DEC C\n    JR NZ, .divmod8_loop\n    LD B, A\n    LD A, D\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "__divmod16",
        Routine {
            name: "__divmod16",
            body: raw(
                "__divmod16",
                "    ; unsigned 16-bit divide: HL = HL / DE, BC = HL % DE\n    LD BC, 0\n    LD A, 16\n.divmod16_loop:\n    ADD HL, HL\n    RL C\n    RL B\n    PUSH HL\n    LD H, B\n    LD L, C\n    OR A\n    SBC HL, DE\n    JR C, .divmod16_skip\n    LD B, H\n    LD C, L\n    POP HL\n    SET 0, L\n    JR .divmod16_next\n.divmod16_skip:\n    POP HL\n.divmod16_next:\n    DEC A\n    JR NZ, .divmod16_loop\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "__shl16",
        Routine {
            name: "__shl16",
            body: raw(
                "__shl16",
                "    ; HL = HL << A, variable shift count in A\n    OR A\n    RET Z\n    LD B, A\n.shl16_loop:\n    ADD HL, HL\n    DJNZ .shl16_loop\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "__shr16",
        Routine {
            name: "__shr16",
            body: raw(
                "__shr16",
                "    ; HL = HL >> A, variable shift count in A, logical\n    OR A\n    RET Z\n    LD B, A\n.shr16_loop:\n    SRL H\n    RR L\n    DJNZ .shr16_loop\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "__shl8",
        Routine {
            name: "__shl8",
            body: raw(
                "__shl8",
                "    ; A = A << B, variable shift count in B\n    LD C, A\n    LD A, B\n    OR A\n    JR Z, .shl8_zero\n    LD B, A\n    LD A, C\n.shl8_loop:\n    ADD A, A\n    DJNZ .shl8_loop\n    RET\n.shl8_zero:\n    LD A, C\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "__shr8",
        Routine {
            name: "__shr8",
            body: raw(
                "__shr8",
                "    ; A = A >> B, variable shift count in B, logical\n    LD C, A\n    LD A, B\n    OR A\n    JR Z, .shr8_zero\n    LD B, A\n    LD A, C\n.shr8_loop:\n    SRL A\n    DJNZ .shr8_loop\n    RET\n.shr8_zero:\n    LD A, C\n    RET",
            ),
            calls: &[],
        },
    );
    m.insert(
        "print_string",
        Routine {
            name: "print_string",
            body: raw(
                "print_string",
                "    ; prints the length-prefixed string at HL\n    LD B, (HL)\n    INC HL\n.print_string_loop:\n    LD A, B\n    OR A\n    RET Z\n    LD A, (HL)\n    CALL print_char\n    INC HL\n    DEC B\n    JR .print_string_loop",
            ),
            calls: &["print_char"],
        },
    );
    m.insert(
        "print_u8_decimal",
        Routine {
            name: "print_u8_decimal",
            body: raw(
                "print_u8_decimal",
                "    ; prints A as an unsigned decimal, no leading zeros\n    LD E, A\n    LD D, 100\n    CALL __divmod8\n    LD C, A\n    LD A, B\n    LD E, A\n    LD D, 10\n    CALL __divmod8\n    PUSH AF\n    LD A, C\n    ADD A, '0'\n    CALL print_char\n    POP AF\n    ADD A, '0'\n    CALL print_char\n    LD A, B\n    ADD A, '0'\n    CALL print_char\n    RET",
            ),
            calls: &["__divmod8", "print_char"],
        },
    );
    m.insert(
        "print_u16_decimal",
        Routine {
            name: "print_u16_decimal",
            body: raw(
                "print_u16_decimal",
                "    ; prints HL as an unsigned decimal, no leading zeros\n    LD B, 0\n    LD DE, 10\n.pu16_divloop:\n    CALL __divmod16\n    LD A, C\n    PUSH AF\n    INC B\n    LD A, H\n    OR L\n    JR NZ, .pu16_divloop\n.pu16_printloop:\n    POP AF\n    ADD A, '0'\n    CALL print_char\n    DJNZ .pu16_printloop\n    RET",
            ),
            calls: &["__divmod16", "print_char"],
        },
    );
    m
}

/// A per-target `print_char` leaf, the one routine whose body genuinely
/// differs by target (spec §4.E.6 names `Target::putchar_routine`).
pub fn print_char_routine(target: Target) -> Routine {
    Routine {
        name: "print_char",
        body: raw("print_char", &format!("    ; A = character to print\n    {}\n    RET", target.putchar_routine())),
        calls: &[],
    }
}

/// Fixed-point closure over `referenced`: starting from the symbols code
/// generation actually called, pull in each routine's own dependencies
/// until nothing new is added, then return just those routines in a
/// stable (insertion) order suitable for emission.
pub fn shake(referenced: &HashSet<String>, target: Target) -> Vec<Routine> {
    let mut catalog = catalog();
    catalog.insert("print_char", print_char_routine(target));

    let mut needed: HashSet<&'static str> = HashSet::new();
    let mut frontier: Vec<&'static str> = catalog.keys().filter(|k| referenced.contains(**k)).copied().collect();
    log::trace!("tree-shaking: {} directly-referenced runtime symbol(s)", frontier.len());

    while let Some(name) = frontier.pop() {
        if !needed.insert(name) {
            continue;
        }
        log::debug!("tree-shaking: keeping {} (keep-set now {})", name, needed.len());
        if let Some(routine) = catalog.get(name) {
            for dep in routine.calls {
                if !needed.contains(dep) {
                    frontier.push(dep);
                }
            }
        }
    }

    let mut names: Vec<&'static str> = needed.into_iter().collect();
    names.sort();
    names.into_iter().filter_map(|n| catalog.remove(n)).collect()
}
