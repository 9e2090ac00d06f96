use crate::middle::ty::Type;

/// Integer and boolean arguments, in the order the System V ABI assigns them
pub const ARGUMENT_REGISTERS: [X86FullRegister; 6] = [
    X86FullRegister::Rdi,
    X86FullRegister::Rsi,
    X86FullRegister::Rdx,
    X86FullRegister::Rcx,
    X86FullRegister::R8,
    X86FullRegister::R9,
];

/// Floating point arguments, in the order the System V ABI assigns them
pub const FLOAT_ARGUMENT_REGISTERS: [XmmRegister; 8] = [
    XmmRegister::Xmm0,
    XmmRegister::Xmm1,
    XmmRegister::Xmm2,
    XmmRegister::Xmm3,
    XmmRegister::Xmm4,
    XmmRegister::Xmm5,
    XmmRegister::Xmm6,
    XmmRegister::Xmm7,
];

/// Registers handed out to variables. All of them are callee-saved, so
/// values survive calls without any extra work at the call site.
pub const ALLOCATABLE_REGISTERS: [X86FullRegister; 5] = [
    X86FullRegister::Rbx,
    X86FullRegister::R12,
    X86FullRegister::R13,
    X86FullRegister::R14,
    X86FullRegister::R15,
];

/// Floating point registers handed out to variables. Every xmm register is
/// caller-saved, so live ones are parked in the frame around calls.
pub const ALLOCATABLE_FLOAT_REGISTERS: [XmmRegister; 7] = [
    XmmRegister::Xmm8,
    XmmRegister::Xmm9,
    XmmRegister::Xmm10,
    XmmRegister::Xmm11,
    XmmRegister::Xmm12,
    XmmRegister::Xmm13,
    XmmRegister::Xmm14,
];

/// Stages integer memory-to-memory moves. Never allocated.
pub const SCRATCH_REGISTER: X86FullRegister = X86FullRegister::R11;

/// Stages floating point memory-to-memory moves. Never allocated.
pub const SCRATCH_FLOAT_REGISTER: XmmRegister = XmmRegister::Xmm15;

/// Accumulates GNU assembler source in Intel syntax
#[derive(Debug, Default)]
pub struct Assembler {
    output: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_output(self) -> String {
        self.output
    }

    fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    pub fn emit(&mut self, string: impl AsRef<str>) {
        self.output.push_str("    ");
        self.push_line(string);
    }

    pub fn global_label(&mut self, name: &str) {
        self.emit(format!(".globl {name}"));
        self.push_line(format!("{name}:"));
    }

    pub fn label(&mut self, name: impl AsRef<str>) {
        self.push_line(format!("{}:", name.as_ref()));
    }

    pub fn comment(&mut self, comment: impl AsRef<str>) {
        self.emit(format!("# {}", comment.as_ref()));
    }

    pub fn function_prologue(&mut self, stack_frame_size: u32) {
        self.emit("push rbp");
        self.emit("mov rbp, rsp");

        if stack_frame_size != 0 {
            self.emit(format!("sub rsp, {stack_frame_size}"));
        }
    }

    pub fn function_epilogue(&mut self) {
        self.emit("mov rsp, rbp");
        self.emit("pop rbp");
        self.emit("ret");
    }
}

/// General Purpose Register 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum X86FullRegister {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl X86FullRegister {
    #[track_caller]
    pub fn with_size_bytes(self, size: u32) -> X86Register {
        match size {
            8 => self.as_64_bit(),
            4 => self.as_32_bit(),
            2 => self.as_16_bit(),
            1 => self.as_8_bit(),
            size => panic!("invalid size in bytes {size}"),
        }
    }

    /// The view of this register holding a value of type `ty`
    pub fn for_type(self, ty: Type) -> X86Register {
        self.with_size_bytes(ty.bytes())
    }

    pub fn as_64_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Rax,
            Self::Rbx => X86Register::Rbx,
            Self::Rcx => X86Register::Rcx,
            Self::Rdx => X86Register::Rdx,
            Self::Rsi => X86Register::Rsi,
            Self::Rdi => X86Register::Rdi,
            Self::Rbp => X86Register::Rbp,
            Self::Rsp => X86Register::Rsp,
            Self::R8 => X86Register::R8,
            Self::R9 => X86Register::R9,
            Self::R10 => X86Register::R10,
            Self::R11 => X86Register::R11,
            Self::R12 => X86Register::R12,
            Self::R13 => X86Register::R13,
            Self::R14 => X86Register::R14,
            Self::R15 => X86Register::R15,
        }
    }

    pub fn as_32_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Eax,
            Self::Rbx => X86Register::Ebx,
            Self::Rcx => X86Register::Ecx,
            Self::Rdx => X86Register::Edx,
            Self::Rsi => X86Register::Esi,
            Self::Rdi => X86Register::Edi,
            Self::Rbp => X86Register::Ebp,
            Self::Rsp => X86Register::Esp,
            Self::R8 => X86Register::R8d,
            Self::R9 => X86Register::R9d,
            Self::R10 => X86Register::R10d,
            Self::R11 => X86Register::R11d,
            Self::R12 => X86Register::R12d,
            Self::R13 => X86Register::R13d,
            Self::R14 => X86Register::R14d,
            Self::R15 => X86Register::R15d,
        }
    }

    pub fn as_16_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Ax,
            Self::Rbx => X86Register::Bx,
            Self::Rcx => X86Register::Cx,
            Self::Rdx => X86Register::Dx,
            Self::Rsi => X86Register::Si,
            Self::Rdi => X86Register::Di,
            Self::Rbp => X86Register::Bp,
            Self::Rsp => X86Register::Sp,
            Self::R8 => X86Register::R8w,
            Self::R9 => X86Register::R9w,
            Self::R10 => X86Register::R10w,
            Self::R11 => X86Register::R11w,
            Self::R12 => X86Register::R12w,
            Self::R13 => X86Register::R13w,
            Self::R14 => X86Register::R14w,
            Self::R15 => X86Register::R15w,
        }
    }

    pub fn as_8_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Al,
            Self::Rbx => X86Register::Bl,
            Self::Rcx => X86Register::Cl,
            Self::Rdx => X86Register::Dl,
            Self::Rsi => X86Register::Sil,
            Self::Rdi => X86Register::Dil,
            Self::Rbp => X86Register::Bpl,
            Self::Rsp => X86Register::Spl,
            Self::R8 => X86Register::R8b,
            Self::R9 => X86Register::R9b,
            Self::R10 => X86Register::R10b,
            Self::R11 => X86Register::R11b,
            Self::R12 => X86Register::R12b,
            Self::R13 => X86Register::R13b,
            Self::R14 => X86Register::R14b,
            Self::R15 => X86Register::R15b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[rustfmt::skip]
pub enum X86Register {
    // 64-bit
    Rax, Rbx, Rcx, Rdx,
    Rsi, Rdi, Rbp, Rsp,
    R8, R9, R10, R11, R12, R13, R14, R15,

    // 32-bit
    Eax, Ebx, Ecx, Edx,
    Esi, Edi, Ebp, Esp,
    R8d, R9d, R10d, R11d, R12d, R13d, R14d, R15d,

    // 16-bit
    Ax, Bx, Cx, Dx,
    Si, Di, Bp, Sp,
    R8w, R9w, R10w, R11w, R12w, R13w, R14w, R15w,

    // 8-bit low
    Al, Bl, Cl, Dl,
    Sil, Dil, Bpl, Spl,
    R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,
}

/// SSE register, holding a single `@f32` or `@f64` in its low lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[rustfmt::skip]
pub enum XmmRegister {
    Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7,
    Xmm8, Xmm9, Xmm10, Xmm11, Xmm12, Xmm13, Xmm14, Xmm15,
}

/// Size keyword used for a memory operand holding a value of type `ty`
pub fn pointer_size(ty: Type) -> &'static str {
    match ty.bytes() {
        1 => "BYTE PTR",
        2 => "WORD PTR",
        4 => "DWORD PTR",
        8 => "QWORD PTR",
        size => panic!("no memory operand holds {size} bytes"),
    }
}

/// `ss` or `sd`, the suffix selecting single or double precision SSE
/// instructions for a floating point type
pub fn float_suffix(ty: Type) -> &'static str {
    match ty.bytes() {
        4 => "ss",
        8 => "sd",
        _ => panic!("{ty:?} is not a floating point type"),
    }
}
