//! PDF 底层写入
//!
//! 先收集全部对象，再一次性输出：对象偏移取自实际写出的字节，
//! 交叉引用表每项固定 20 字节，输出后逐项回查偏移处确为对应对象头。

use crate::error::ExportError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

const FORMAT: &str = "PDF";

/// 对象编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub usize);

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} 0 R", self.0)
    }
}

#[derive(Debug, Clone)]
enum PdfObject {
    /// 任意直接对象（字典、数组等）的源文本
    Direct(String),
    Stream { dict: String, data: Vec<u8> },
}

/// PDF 文档构建器
#[derive(Debug, Default)]
pub struct PdfDocument {
    objects: Vec<Option<PdfObject>>,
}

impl PdfDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预留编号，稍后用 [`set`](Self::set) 填充（用于互相引用的对象）
    pub fn reserve(&mut self) -> ObjId {
        self.objects.push(None);
        ObjId(self.objects.len())
    }

    pub fn set(&mut self, id: ObjId, body: impl Into<String>) {
        if let Some(slot) = self.objects.get_mut(id.0 - 1) {
            *slot = Some(PdfObject::Direct(body.into()));
        }
    }

    pub fn add(&mut self, body: impl Into<String>) -> ObjId {
        let id = self.reserve();
        self.set(id, body);
        id
    }

    /// 添加流对象；`compress` 时用 FlateDecode 压缩
    pub fn add_stream(&mut self, extra_dict: &str, data: &[u8], compress: bool) -> Result<ObjId, ExportError> {
        let (dict, data) = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            let compressed = encoder.finish()?;
            (format!("{} /Filter /FlateDecode", extra_dict), compressed)
        } else {
            (extra_dict.to_string(), data.to_vec())
        };
        self.objects.push(Some(PdfObject::Stream { dict, data }));
        Ok(ObjId(self.objects.len()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 输出完整文件
    pub fn finish(self, root: ObjId, info: Option<ObjId>) -> Result<Vec<u8>, ExportError> {
        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

        let mut offsets = Vec::with_capacity(self.objects.len());
        for (i, object) in self.objects.iter().enumerate() {
            let number = i + 1;
            let object = object.as_ref().ok_or_else(|| {
                ExportError::invariant(FORMAT, format!("object {} reserved but never set", number))
            })?;
            offsets.push(out.len());
            write!(out, "{} 0 obj\n", number)?;
            match object {
                PdfObject::Direct(body) => {
                    out.extend_from_slice(body.as_bytes());
                }
                PdfObject::Stream { dict, data } => {
                    write!(out, "<< {} /Length {} >>\nstream\n", dict.trim(), data.len())?;
                    out.extend_from_slice(data);
                    out.extend_from_slice(b"\nendstream");
                }
            }
            out.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = out.len();
        write!(out, "xref\n0 {}\n", offsets.len() + 1)?;
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in &offsets {
            write!(out, "{:010} 00000 n \n", offset)?;
        }

        write!(out, "trailer\n<< /Size {} /Root {}", offsets.len() + 1, root)?;
        if let Some(info) = info {
            write!(out, " /Info {}", info)?;
        }
        write!(out, " >>\nstartxref\n{}\n%%EOF\n", xref_offset)?;

        verify_offsets(&out, &offsets, xref_offset)?;
        Ok(out)
    }
}

/// 回查交叉引用：每个偏移处必须是 `N 0 obj`，startxref 处必须是 `xref`
fn verify_offsets(out: &[u8], offsets: &[usize], xref_offset: usize) -> Result<(), ExportError> {
    for (i, &offset) in offsets.iter().enumerate() {
        let header = format!("{} 0 obj", i + 1);
        if !out.get(offset..).is_some_and(|s| s.starts_with(header.as_bytes())) {
            return Err(ExportError::invariant(
                FORMAT,
                format!("xref entry for object {} points at wrong bytes", i + 1),
            ));
        }
    }
    if !out.get(xref_offset..).is_some_and(|s| s.starts_with(b"xref")) {
        return Err(ExportError::invariant(FORMAT, "startxref does not point at xref table"));
    }
    Ok(())
}

/// PDF 文本字符串字面量
///
/// 转义括号和反斜杠；Latin-1 以外的字符无法用标准字体编码，替换为 `?`。
pub fn pdf_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c if (c as u32) >= 0xA0 && (c as u32) <= 0xFF => {
                out.push_str(&format!("\\{:03o}", c as u32));
            }
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

/// 页面坐标数值格式
pub fn num(v: f64) -> String {
    let s = format!("{:.2}", v);
    if s == "-0.00" {
        "0.00".to_string()
    } else {
        s
    }
}
