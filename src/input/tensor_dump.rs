// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/input/tensor_dump.rs - 输出张量转储输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::FromUrl;
use crate::tensor::{Quantization, TensorDesc, TensorError, TensorType, TensorView};

const TENSOR_DUMP_SCHEME: &str = "tensor";

#[derive(Error, Debug)]
pub enum TensorDumpError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("描述文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("描述文件字段无效: {0}")]
  InvalidDescriptor(String),
}

/// 转储的张量数据，浮点张量在读入时按小端解出
pub enum TensorData {
  Bytes(Vec<u8>),
  Floats(Vec<f32>),
}

/// 一份推理输出转储: 输入/输出张量描述加原始缓冲区
///
/// 转储文件为原始字节，旁边的 JSON 描述文件记录引擎报告的形状、
/// 元素类型与量化参数。
pub struct TensorDump {
  pub input_desc: TensorDesc,
  pub output_desc: TensorDesc,
  data: TensorData,
}

impl FromUrl for TensorDump {
  type Error = TensorDumpError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != TENSOR_DUMP_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        TENSOR_DUMP_SCHEME,
        url.scheme()
      );
      return Err(TensorDumpError::SchemeMismatch);
    }

    let path = std::path::PathBuf::from(url.path());

    // desc 查询参数可覆盖描述文件位置，默认同名 .json
    let desc_path = url
      .query_pairs()
      .find(|(key, _)| key.as_ref() == "desc")
      .map(|(_, value)| std::path::PathBuf::from(value.into_owned()))
      .unwrap_or_else(|| path.with_extension("json"));

    let desc: Value = serde_json::from_str(&std::fs::read_to_string(&desc_path)?)?;
    let input_desc = TensorDesc {
      shape: shape_field(&desc, "input_shape")?,
      tensor_type: TensorType::UInt8,
      quantization: Box::new([]),
    };
    let tensor_type = type_field(&desc, "tensor_type")?;
    let output_desc = TensorDesc {
      shape: shape_field(&desc, "output_shape")?,
      tensor_type,
      quantization: quantization_field(&desc)?,
    };

    let bytes = std::fs::read(&path)?;
    debug!(
      "读取张量转储 {} 字节, 元素类型 {:?}",
      bytes.len(),
      tensor_type
    );

    let data = match tensor_type {
      TensorType::Float32 => {
        if bytes.len() % 4 != 0 {
          return Err(TensorDumpError::InvalidDescriptor(format!(
            "浮点转储长度 {} 不是 4 的倍数",
            bytes.len()
          )));
        }
        TensorData::Floats(
          bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        )
      }
      _ => TensorData::Bytes(bytes),
    };

    Ok(TensorDump {
      input_desc,
      output_desc,
      data,
    })
  }
}

impl TensorDump {
  /// 以解码器需要的视图访问转储数据
  pub fn view(&self) -> Result<TensorView<'_>, TensorError> {
    match &self.data {
      TensorData::Bytes(bytes) => TensorView::quantized(bytes, &self.output_desc),
      TensorData::Floats(floats) => Ok(TensorView::float(floats)),
    }
  }
}

fn shape_field(desc: &Value, key: &str) -> Result<Box<[usize]>, TensorDumpError> {
  let array = desc[key]
    .as_array()
    .ok_or_else(|| TensorDumpError::InvalidDescriptor(format!("缺少形状字段 {}", key)))?;

  array
    .iter()
    .map(|dim| {
      dim
        .as_u64()
        .map(|dim| dim as usize)
        .ok_or_else(|| TensorDumpError::InvalidDescriptor(format!("{} 含非整数维度", key)))
    })
    .collect()
}

fn type_field(desc: &Value, key: &str) -> Result<TensorType, TensorDumpError> {
  let keyword = desc[key]
    .as_str()
    .ok_or_else(|| TensorDumpError::InvalidDescriptor(format!("缺少元素类型字段 {}", key)))?;

  TensorType::from_keyword(keyword)
    .ok_or_else(|| TensorDumpError::InvalidDescriptor(format!("未知元素类型 {}", keyword)))
}

fn quantization_field(desc: &Value) -> Result<Box<[Quantization]>, TensorDumpError> {
  let Some(array) = desc["quantization"].as_array() else {
    // 浮点张量可以没有量化参数；组数校验在张量契约层做
    return Ok(Box::new([]));
  };

  array
    .iter()
    .map(|pair| {
      let scale = pair["scale"].as_f64().ok_or_else(|| {
        TensorDumpError::InvalidDescriptor("量化参数缺少 scale".to_string())
      })?;
      let zero_point = pair["zero_point"].as_i64().ok_or_else(|| {
        TensorDumpError::InvalidDescriptor("量化参数缺少 zero_point".to_string())
      })?;
      Ok(Quantization {
        scale: scale as f32,
        zero_point,
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn descriptor_fields_parse() {
    let desc: Value = serde_json::from_str(
      r#"{
        "input_shape": [1, 416, 416, 3],
        "output_shape": [1, 3549, 85],
        "tensor_type": "uint8",
        "quantization": [{"scale": 0.5, "zero_point": 3}]
      }"#,
    )
    .unwrap();

    assert_eq!(
      shape_field(&desc, "input_shape").unwrap().as_ref(),
      &[1, 416, 416, 3]
    );
    assert_eq!(type_field(&desc, "tensor_type").unwrap(), TensorType::UInt8);
    let quant = quantization_field(&desc).unwrap();
    assert_eq!(quant.len(), 1);
    assert_eq!(quant[0].zero_point, 3);
    assert!((quant[0].scale - 0.5).abs() < 1e-6);
  }

  #[test]
  fn missing_fields_are_named_errors() {
    let desc: Value = serde_json::from_str(r#"{"tensor_type": "half"}"#).unwrap();
    assert!(matches!(
      shape_field(&desc, "output_shape"),
      Err(TensorDumpError::InvalidDescriptor(_))
    ));
    assert!(matches!(
      type_field(&desc, "tensor_type"),
      Err(TensorDumpError::InvalidDescriptor(_))
    ));
    // 缺失的量化字段退化为空表，由张量契约层拒绝
    assert!(quantization_field(&desc).unwrap().is_empty());
  }
}
