use std::collections::HashMap;

use crate::bytecode::{BranchInfo, ByteCode, CopyKind, JumpMode, Opcode, Operand, PredicateBranch};
use crate::dispatch::{DispatchRegistry, TypeMap};
use crate::error::RigVmError;
use crate::memory::{MemoryLayout, MemoryType, RegisterDesc};
use crate::registry::{TypeIndex, TypeRegistry};
use crate::vm::Program;

use super::literal::{parse_value, unquote};
use super::AsmError;

#[derive(Debug)]
enum Line {
    /// Start of an `.entry` block, or of an anonymous `.code` block.
    Block(Option<String>, usize),
    Label(String, usize),
    Lazy(Vec<String>, usize),
    Branch(Vec<String>, usize),
    Instruction(String, Vec<String>, usize),
}

type Attachment = (Vec<String>, usize);

/// Assembles program text. Function names and dispatch permutations are
/// resolved against `dispatch`; register types against its type registry.
pub fn assemble(source: &str, dispatch: &DispatchRegistry) -> Result<Program, AsmError> {
    let registry = dispatch.types();
    let mut program = Program::default();
    let mut body = Vec::new();
    let mut section: Option<MemoryType> = None;
    let mut in_block = false;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(memory_type) = section {
            if line == ".end" {
                section = None;
                continue;
            }
            let register = parse_register(line, line_no, registry)?;
            let layout = layout_mut(&mut program, memory_type);
            if layout.find(&register.name).is_some() {
                return Err(AsmError::syntax(
                    line_no,
                    format!("register '{}' is declared twice", register.name),
                ));
            }
            layout.push(register);
            continue;
        }

        if in_block {
            if line == ".end" {
                in_block = false;
                continue;
            }
            if let Some(label) = line.strip_suffix(':') {
                body.push(Line::Label(label.trim().to_string(), line_no));
                continue;
            }
            let mut tokens = tokenize(line, line_no)?.into_iter();
            let head = tokens
                .next()
                .ok_or_else(|| AsmError::syntax(line_no, "missing mnemonic"))?;
            let rest = tokens.collect();
            body.push(match head.as_str() {
                ".lazy" => Line::Lazy(rest, line_no),
                ".branch" => Line::Branch(rest, line_no),
                _ => Line::Instruction(head, rest, line_no),
            });
            continue;
        }

        let tokens = tokenize(line, line_no)?;
        match tokens.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            [".literals"] => section = Some(MemoryType::Literal),
            [".work"] => section = Some(MemoryType::Work),
            [".externals"] => section = Some(MemoryType::External),
            [".code"] => {
                in_block = true;
                body.push(Line::Block(None, line_no));
            }
            [".entry", name] => {
                in_block = true;
                body.push(Line::Block(Some(text_token(name, line_no)?), line_no));
            }
            [".entry", ..] => return Err(AsmError::syntax(line_no, "expected .entry <name>")),
            _ => return Err(AsmError::syntax(line_no, format!("unexpected directive {line}"))),
        }
    }

    let last_line = source.lines().count();
    if section.is_some() {
        return Err(AsmError::syntax(last_line, "unterminated register section"));
    }
    if in_block {
        return Err(AsmError::syntax(last_line, "unterminated block"));
    }

    let mut labels = HashMap::new();
    let mut count = 0usize;
    for line in &body {
        match line {
            Line::Label(label, line_no) => {
                if label.is_empty() || label.starts_with(|ch: char| ch.is_ascii_digit()) {
                    return Err(AsmError::syntax(*line_no, format!("invalid label '{label}'")));
                }
                if labels.insert(label.clone(), count).is_some() {
                    return Err(AsmError::DuplicateLabel {
                        line: *line_no,
                        label: label.clone(),
                    });
                }
            }
            Line::Instruction(..) => count += 1,
            _ => {}
        }
    }

    let mut encoder = Encoder {
        code: ByteCode::new(),
        program,
        labels,
        dispatch,
    };
    let mut lazies: Vec<Attachment> = Vec::new();
    let mut branches: Vec<Attachment> = Vec::new();
    for line in body {
        match line {
            Line::Block(name, line_no) => {
                dangling(&lazies, &branches, line_no)?;
                if let Some(name) = name {
                    encoder.code.add_entry(&name)?;
                }
            }
            Line::Label(..) => {}
            Line::Lazy(tokens, line_no) => lazies.push((tokens, line_no)),
            Line::Branch(tokens, line_no) => branches.push((tokens, line_no)),
            Line::Instruction(mnemonic, tokens, line_no) => {
                encoder.instruction(&mnemonic, &tokens, line_no, &lazies, &branches)?;
                lazies.clear();
                branches.clear();
            }
        }
    }
    dangling(&lazies, &branches, last_line)?;

    let Encoder { code, mut program, .. } = encoder;
    program.byte_code = code;
    Ok(program)
}

fn dangling(lazies: &[Attachment], branches: &[Attachment], line: usize) -> Result<(), AsmError> {
    match lazies.first().or_else(|| branches.first()) {
        Some((_, line_no)) => Err(AsmError::syntax(
            *line_no,
            format!("directive is not followed by an instruction before line {line}"),
        )),
        None => Ok(()),
    }
}

struct Encoder<'a> {
    code: ByteCode,
    program: Program,
    labels: HashMap<String, usize>,
    dispatch: &'a DispatchRegistry,
}

impl Encoder<'_> {
    fn instruction(
        &mut self,
        mnemonic: &str,
        args: &[String],
        line: usize,
        lazies: &[Attachment],
        branches: &[Attachment],
    ) -> Result<(), AsmError> {
        let current = self.code.num_instructions();
        if mnemonic == "dispatch" {
            let (template, rest) = args
                .split_first()
                .ok_or_else(|| AsmError::syntax(line, "expected dispatch <template> [ARG=TYPE...] <operands>"))?;
            let (function_index, operands) = self.dispatch_function(template, rest, line)?;
            let predicates = self.predicates(&operands, lazies)?;
            self.attachments_allowed(&[], branches)?;
            self.code.add_execute_op(function_index, &operands, &predicates)?;
            return Ok(());
        }

        let opcode = Opcode::from_name(mnemonic).ok_or_else(|| AsmError::UnknownMnemonic {
            line,
            mnemonic: mnemonic.to_string(),
        })?;
        match opcode {
            Opcode::Execute => self.attachments_allowed(&[], branches)?,
            Opcode::JumpToBranch => self.attachments_allowed(lazies, &[])?,
            _ => self.attachments_allowed(lazies, branches)?,
        }

        match opcode {
            Opcode::Zero | Opcode::BoolFalse | Opcode::BoolTrue | Opcode::Increment | Opcode::Decrement => {
                expect_args(args, 1, line, mnemonic)?;
                self.code.add_unary_op(opcode, self.operand(&args[0], line)?)?;
            }
            Opcode::Copy => {
                let kind = match args.len() {
                    2 => CopyKind::Default,
                    3 => CopyKind::from_name(&args[2])
                        .ok_or_else(|| AsmError::syntax(line, format!("unknown copy kind {}", args[2])))?,
                    _ => return Err(AsmError::syntax(line, "expected copy <source> <target> [kind]")),
                };
                let source = self.operand(&args[0], line)?;
                let target = self.operand(&args[1], line)?;
                self.code.add_copy_op_with_kind(kind, source, target);
            }
            Opcode::Equals | Opcode::NotEquals => {
                expect_args(args, 3, line, mnemonic)?;
                let a = self.operand(&args[0], line)?;
                let b = self.operand(&args[1], line)?;
                let result = self.operand(&args[2], line)?;
                if opcode == Opcode::Equals {
                    self.code.add_equals_op(a, b, result);
                } else {
                    self.code.add_not_equals_op(a, b, result);
                }
            }
            Opcode::JumpAbsolute | Opcode::JumpForward | Opcode::JumpBackward => {
                expect_args(args, 1, line, mnemonic)?;
                let stored = self.jump(opcode, current, &args[0], line)?;
                self.code.add_jump_op(jump_mode(opcode, line)?, stored);
            }
            Opcode::JumpAbsoluteIf | Opcode::JumpForwardIf | Opcode::JumpBackwardIf => {
                expect_args(args, 3, line, mnemonic)?;
                let arg = self.operand(&args[0], line)?;
                let condition = match args[1].as_str() {
                    "true" => true,
                    "false" => false,
                    other => return Err(AsmError::syntax(line, format!("invalid condition {other}"))),
                };
                let stored = self.jump(opcode, current, &args[2], line)?;
                self.code.add_jump_if_op(jump_mode(opcode, line)?, arg, stored, condition);
            }
            Opcode::Execute => {
                let (name, rest) = args
                    .split_first()
                    .ok_or_else(|| AsmError::syntax(line, "expected execute <function> <operands>"))?;
                let name = text_token(name, line)?;
                let record = self
                    .dispatch
                    .find_or_resolve_function(&name)
                    .map_err(|source| AsmError::Resolve { line, source })?;
                let function_index = self.program.add_function(record.name())?;
                let operands = rest
                    .iter()
                    .map(|token| self.operand(token, line))
                    .collect::<Result<Vec<_>, _>>()?;
                let predicates = self.predicates(&operands, lazies)?;
                self.code.add_execute_op(function_index, &operands, &predicates)?;
            }
            Opcode::Exit => {
                expect_args(args, 0, line, mnemonic)?;
                self.code.add_exit_op();
            }
            Opcode::BeginBlock => {
                expect_args(args, 2, line, mnemonic)?;
                let count = self.operand(&args[0], line)?;
                let index = self.operand(&args[1], line)?;
                self.code.add_begin_block_op(count, index);
            }
            Opcode::EndBlock => {
                expect_args(args, 0, line, mnemonic)?;
                self.code.add_end_block_op();
            }
            Opcode::InvokeEntry => {
                expect_args(args, 1, line, mnemonic)?;
                self.code.add_invoke_entry_op(&text_token(&args[0], line)?);
            }
            Opcode::JumpToBranch => {
                expect_args(args, 1, line, mnemonic)?;
                let arg = self.operand(&args[0], line)?;
                let infos = branches
                    .iter()
                    .map(|(tokens, line_no)| match tokens.as_slice() {
                        [label, first, last] => Ok(BranchInfo::new(
                            text_token(label, *line_no)?,
                            self.position(first, *line_no)?,
                            self.position(last, *line_no)?,
                        )),
                        _ => Err(AsmError::syntax(*line_no, "expected .branch <label> <first> <last>")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.code.add_jump_to_branch_op(arg, &infos)?;
            }
            Opcode::RunInstructions => {
                let guard = match args.len() {
                    2 => Operand::NONE,
                    3 => self.operand(&args[2], line)?,
                    _ => return Err(AsmError::syntax(line, "expected run <first> <last> [guard]")),
                };
                let start = self.position(&args[0], line)?;
                let end = self.position(&args[1], line)?;
                self.code.add_run_instructions_op(guard, start, end);
            }
            Opcode::SetupTraits => {
                let traits = args
                    .iter()
                    .map(|token| self.operand(token, line))
                    .collect::<Result<Vec<_>, _>>()?;
                self.code.add_setup_traits_op(&traits)?;
            }
        }
        Ok(())
    }

    fn attachments_allowed(&self, lazies: &[Attachment], branches: &[Attachment]) -> Result<(), AsmError> {
        if let Some((_, line_no)) = lazies.first() {
            return Err(AsmError::syntax(*line_no, ".lazy must precede execute or dispatch"));
        }
        if let Some((_, line_no)) = branches.first() {
            return Err(AsmError::syntax(*line_no, ".branch must precede jump_to_branch"));
        }
        Ok(())
    }

    fn predicates(&self, operands: &[Operand], lazies: &[Attachment]) -> Result<Vec<PredicateBranch>, AsmError> {
        lazies
            .iter()
            .map(|(tokens, line_no)| match tokens.as_slice() {
                [argument, first, last] => {
                    let index = argument
                        .parse::<u16>()
                        .map_err(|_| AsmError::syntax(*line_no, format!("invalid argument index {argument}")))?;
                    let operand = operands.get(index as usize).copied().ok_or_else(|| {
                        AsmError::syntax(*line_no, format!("lazy argument {index} has no operand"))
                    })?;
                    Ok(PredicateBranch::new(
                        index,
                        operand,
                        self.position(first, *line_no)?,
                        self.position(last, *line_no)?,
                    ))
                }
                _ => Err(AsmError::syntax(*line_no, "expected .lazy <argument> <first> <last>")),
            })
            .collect()
    }

    fn dispatch_function(&mut self, template: &str, args: &[String], line: usize) -> Result<(u16, Vec<Operand>), AsmError> {
        let resolve_error = |source: RigVmError| AsmError::Resolve { line, source };
        let (bindings, operand_tokens): (Vec<&String>, Vec<&String>) =
            args.iter().partition(|token| token.contains('='));
        let operands = operand_tokens
            .iter()
            .map(|token| self.operand(token, line))
            .collect::<Result<Vec<_>, _>>()?;

        let mut types: Option<TypeMap> = None;
        for binding in bindings {
            let (argument, type_name) = binding
                .split_once('=')
                .ok_or_else(|| AsmError::syntax(line, format!("invalid binding {binding}")))?;
            let type_index = self.registry().get_type_index_by_name(type_name);
            if !type_index.is_valid() {
                return Err(resolve_error(RigVmError::UnknownType(type_name.to_string())));
            }
            if let Some(map) = &types {
                if map.get(argument) != Some(&type_index) {
                    return Err(AsmError::syntax(
                        line,
                        format!("binding {binding} conflicts with the earlier bindings"),
                    ));
                }
                continue;
            }
            types = Some(
                self.dispatch
                    .propagate_argument_type(template, argument, type_index)
                    .map_err(resolve_error)?,
            );
        }
        let types = match types {
            Some(types) => types,
            None => self.infer_permutation(template, &operands, line)?,
        };
        let record = self.dispatch.resolve(template, &types).map_err(resolve_error)?;
        Ok((self.program.add_function(record.name())?, operands))
    }

    /// Propagates each operand's register type in argument order and keeps
    /// the first permutation every operand agrees with, falling back to the
    /// first one the template accepted.
    fn infer_permutation(&self, template: &str, operands: &[Operand], line: usize) -> Result<TypeMap, AsmError> {
        let found = self.dispatch.template(template).ok_or_else(|| AsmError::Resolve {
            line,
            source: RigVmError::UnknownTemplate(template.to_string()),
        })?;
        let typed: Vec<(&str, TypeIndex)> = found
            .arguments()
            .iter()
            .zip(operands)
            .map(|(argument, operand)| (argument.name.as_str(), self.operand_type(*operand)))
            .filter(|(_, type_index)| type_index.is_valid())
            .collect();
        let mut fallback = None;
        for (argument, type_index) in &typed {
            let Ok(types) = self.dispatch.propagate_argument_type(template, argument, *type_index) else {
                continue;
            };
            if typed.iter().all(|(name, index)| types.get(*name) == Some(index)) {
                return Ok(types);
            }
            fallback.get_or_insert(types);
        }
        fallback.ok_or_else(|| {
            AsmError::syntax(line, format!("cannot infer a permutation of '{template}' from its operands"))
        })
    }

    fn registry(&self) -> &TypeRegistry {
        self.dispatch.types()
    }

    fn operand_type(&self, operand: Operand) -> TypeIndex {
        let register = operand
            .memory_type()
            .and_then(|memory_type| layout(&self.program, memory_type).get(operand.register_index() as usize));
        let Some(register) = register else {
            return TypeIndex::INVALID;
        };
        let type_index = self.registry().get_type_index_by_name(&register.type_name);
        match operand.register_offset() {
            Some(_) => self.registry().get_base_type_of(type_index),
            None => type_index,
        }
    }

    fn operand(&self, token: &str, line: usize) -> Result<Operand, AsmError> {
        if token == "_" {
            return Ok(Operand::NONE);
        }
        let mut chars = token.chars();
        let memory_type = chars
            .next()
            .and_then(MemoryType::from_sigil)
            .ok_or_else(|| AsmError::syntax(line, format!("'{token}' is not an operand")))?;
        let rest = chars.as_str();
        let (register, element) = match rest.strip_suffix(']').and_then(|inner| inner.split_once('[')) {
            Some((register, element)) => {
                let element = element
                    .parse::<u16>()
                    .map_err(|_| AsmError::syntax(line, format!("invalid element index in {token}")))?;
                (register, Some(element))
            }
            None => (rest, None),
        };
        let index = match register.parse::<u16>() {
            Ok(index) => index,
            Err(_) => layout(&self.program, memory_type)
                .find(register)
                .map(|index| index as u16)
                .ok_or_else(|| AsmError::UnknownRegister {
                    line,
                    name: token.to_string(),
                })?,
        };
        let operand = Operand::new(memory_type, index);
        Ok(match element {
            Some(element) => operand.with_offset(element),
            None => operand,
        })
    }

    /// Label or absolute instruction index.
    fn target(&self, token: &str, line: usize) -> Result<usize, AsmError> {
        if let Ok(index) = token.parse::<usize>() {
            return Ok(index);
        }
        self.labels.get(token).copied().ok_or_else(|| AsmError::UndefinedLabel {
            line,
            label: token.to_string(),
        })
    }

    fn position(&self, token: &str, line: usize) -> Result<u32, AsmError> {
        let target = self.target(token, line)?;
        u32::try_from(target).map_err(|_| AsmError::syntax(line, format!("instruction {target} out of range")))
    }

    fn jump(&self, opcode: Opcode, current: usize, token: &str, line: usize) -> Result<u32, AsmError> {
        let target = self.target(token, line)?;
        jump_mode(opcode, line)?
            .encode(current, target)
            .ok_or_else(|| AsmError::syntax(line, format!("{} cannot reach {token}", opcode.name())))
    }
}

fn jump_mode(opcode: Opcode, line: usize) -> Result<JumpMode, AsmError> {
    opcode
        .jump_mode()
        .ok_or_else(|| AsmError::syntax(line, format!("'{}' is not a jump", opcode.name())))
}

fn expect_args(args: &[String], count: usize, line: usize, mnemonic: &str) -> Result<(), AsmError> {
    if args.len() == count {
        return Ok(());
    }
    Err(AsmError::syntax(
        line,
        format!("{mnemonic} takes {count} operands, {} given", args.len()),
    ))
}

fn layout(program: &Program, memory_type: MemoryType) -> &MemoryLayout {
    match memory_type {
        MemoryType::Literal => &program.literals,
        MemoryType::Work => &program.work,
        MemoryType::External => &program.externals,
    }
}

fn layout_mut(program: &mut Program, memory_type: MemoryType) -> &mut MemoryLayout {
    match memory_type {
        MemoryType::Literal => &mut program.literals,
        MemoryType::Work => &mut program.work,
        MemoryType::External => &mut program.externals,
    }
}

fn parse_register(line: &str, line_no: usize, registry: &TypeRegistry) -> Result<RegisterDesc, AsmError> {
    let (name, rest) = split_token(line);
    let (type_name, rest) = split_token(rest);
    if name.is_empty() || type_name.is_empty() {
        return Err(AsmError::syntax(line_no, "expected <name> <type> [sliced] [default]"));
    }
    if name.starts_with(|ch: char| ch.is_ascii_digit()) || name.contains(['[', ']', '"']) {
        return Err(AsmError::syntax(line_no, format!("invalid register name '{name}'")));
    }
    let type_index = registry.get_type_index_by_name(type_name);
    if !type_index.is_valid() {
        return Err(AsmError::Resolve {
            line: line_no,
            source: RigVmError::UnknownType(type_name.to_string()),
        });
    }
    let (sliced, rest) = match split_token(rest) {
        ("sliced", after) => (true, after),
        _ => (false, rest),
    };
    let rest = rest.trim();
    let default = if rest.is_empty() {
        None
    } else {
        Some(parse_value(rest, type_index, registry).map_err(|message| AsmError::syntax(line_no, message))?)
    };
    Ok(RegisterDesc {
        name: name.to_string(),
        type_name: type_name.to_string(),
        sliced,
        default,
    })
}

fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], &text[end..]),
        None => (text, ""),
    }
}

/// Bare word or quoted string.
fn text_token(token: &str, line: usize) -> Result<String, AsmError> {
    if token.starts_with('"') {
        unquote(token).map_err(|message| AsmError::syntax(line, message))
    } else {
        Ok(token.to_string())
    }
}

/// Splits on whitespace, keeping quoted strings whole.
fn tokenize(line: &str, line_no: usize) -> Result<Vec<String>, AsmError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in line.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        current.push(ch);
    }
    if in_string {
        return Err(AsmError::syntax(line_no, "unterminated string literal"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}
