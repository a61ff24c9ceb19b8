// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/tensor.rs - 张量契约与反量化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
  UInt8,
  Int8,
  Float32,
}

impl TensorType {
  pub fn is_quantized(&self) -> bool {
    matches!(self, TensorType::UInt8 | TensorType::Int8)
  }

  /// 从描述文件中的关键字解析元素类型
  pub fn from_keyword(keyword: &str) -> Option<Self> {
    match keyword {
      "uint8" => Some(TensorType::UInt8),
      "int8" => Some(TensorType::Int8),
      "float32" => Some(TensorType::Float32),
      _ => None,
    }
  }
}

/// 仿射量化参数: real = (stored - zero_point) * scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
  pub scale: f32,
  pub zero_point: i64,
}

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("量化参数组数必须为 1, 实际为 {0}")]
  QuantizationCount(usize),
  #[error("元素类型 {0:?} 不是量化类型")]
  NotQuantized(TensorType),
}

/// 推理引擎报告的张量描述
#[derive(Debug, Clone)]
pub struct TensorDesc {
  pub shape: Box<[usize]>,
  pub tensor_type: TensorType,
  pub quantization: Box<[Quantization]>,
}

impl TensorDesc {
  /// 取出唯一的一组量化参数，组数不为 1 视为硬错误
  pub fn quantization(&self) -> Result<&Quantization, TensorError> {
    match self.quantization.as_ref() {
      [quant] => Ok(quant),
      other => Err(TensorError::QuantizationCount(other.len())),
    }
  }
}

/// 反量化一个原始字节
///
/// Int8 类型按有符号整数 [-128, 127] 解释，其余按无符号 [0, 255] 解释。
/// 全部 256 个字节值都是合法输入。
pub fn dequantize(value: u8, quant: &Quantization, tensor_type: TensorType) -> f32 {
  let raw = match tensor_type {
    TensorType::Int8 => (value as i8) as i64,
    _ => value as i64,
  };
  (raw - quant.zero_point) as f32 * quant.scale
}

/// 解码器读取张量样本的统一入口
///
/// 量化变体逐样本反量化，浮点变体直接读取，不做任何近似。
pub enum TensorView<'a> {
  Quantized {
    data: &'a [u8],
    tensor_type: TensorType,
    quantization: Quantization,
  },
  Float(&'a [f32]),
}

impl<'a> TensorView<'a> {
  /// 由量化张量的描述和原始字节构造视图
  ///
  /// 在此一次性校验元素类型与量化参数组数，解码循环内不再检查。
  pub fn quantized(data: &'a [u8], desc: &TensorDesc) -> Result<Self, TensorError> {
    if !desc.tensor_type.is_quantized() {
      return Err(TensorError::NotQuantized(desc.tensor_type));
    }
    let quantization = *desc.quantization()?;

    Ok(TensorView::Quantized {
      data,
      tensor_type: desc.tensor_type,
      quantization,
    })
  }

  pub fn float(data: &'a [f32]) -> Self {
    TensorView::Float(data)
  }

  pub fn len(&self) -> usize {
    match self {
      TensorView::Quantized { data, .. } => data.len(),
      TensorView::Float(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 读取第 index 个样本的实数值，调用方保证 index 在界内
  pub fn get(&self, index: usize) -> f32 {
    match self {
      TensorView::Quantized {
        data,
        tensor_type,
        quantization,
      } => dequantize(data[index], quantization, *tensor_type),
      TensorView::Float(data) => data[index],
    }
  }
}
