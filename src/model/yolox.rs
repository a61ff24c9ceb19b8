// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/model/yolox.rs - YOLOX 检测头解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::{debug, error};

use crate::model::DetectItem;
use crate::tensor::{TensorDesc, TensorError, TensorView};

/// 三个尺度的下采样步长，顺序即输出布局顺序
pub const YOLOX_STRIDES: [usize; 3] = [8, 16, 32];
/// 参考实现的检测阈值
pub const YOLOX_DET_THRESHOLD: f32 = 0.25;

// 每个格子前 5 个元素: cx, cy, w, h, objectness
const YOLOX_BOX_ELEMENTS: usize = 5;

#[derive(Error, Debug)]
pub enum YoloxError {
  #[error("输入张量形状无效: {0:?}")]
  InvalidInputShape(Box<[usize]>),
  #[error("输出张量形状无效: {0:?}")]
  InvalidOutputShape(Box<[usize]>),
  #[error("网格数量不匹配: 期望 {expected}, 实际 {actual}")]
  CellCountMismatch { expected: usize, actual: usize },
  #[error("输出缓冲区长度不匹配: 期望 {expected}, 实际 {actual}")]
  BufferLengthMismatch { expected: usize, actual: usize },
  #[error(transparent)]
  Tensor(#[from] TensorError),
}

/// 无锚框三尺度检测头的解码器
///
/// 构造时一次性校验输入输出形状与量化参数，解码阶段不再混入配置检查。
pub struct YoloxDecoder {
  input_width: usize,
  input_height: usize,
  grids: [(usize, usize); 3], // 每个尺度的 (高, 宽)
  num_cells: usize,
  num_classes: usize,
  det_threshold: f32,
}

impl YoloxDecoder {
  pub fn new(input_desc: &TensorDesc, output_desc: &TensorDesc) -> Result<Self, YoloxError> {
    let &[_, input_height, input_width, _] = input_desc.shape.as_ref() else {
      error!("输入张量应为 4 维 NHWC, 实际形状 {:?}", input_desc.shape);
      return Err(YoloxError::InvalidInputShape(input_desc.shape.clone()));
    };
    if input_height == 0 || input_width == 0 {
      return Err(YoloxError::InvalidInputShape(input_desc.shape.clone()));
    }

    let &[_, num_cells, num_elements] = output_desc.shape.as_ref() else {
      error!("输出张量应为 3 维, 实际形状 {:?}", output_desc.shape);
      return Err(YoloxError::InvalidOutputShape(output_desc.shape.clone()));
    };
    if num_elements <= YOLOX_BOX_ELEMENTS {
      return Err(YoloxError::InvalidOutputShape(output_desc.shape.clone()));
    }

    // 量化输出的参数组数在此定版，组数不为 1 直接失败
    if output_desc.tensor_type.is_quantized() {
      output_desc.quantization()?;
    }

    let grids = YOLOX_STRIDES.map(|stride| (input_height / stride, input_width / stride));
    let expected: usize = grids.iter().map(|&(h, w)| h * w).sum();
    if expected != num_cells {
      error!(
        "检测头与模型不兼容: 期望 {} 个格子, 输出张量给出 {}",
        expected, num_cells
      );
      return Err(YoloxError::CellCountMismatch {
        expected,
        actual: num_cells,
      });
    }

    debug!(
      "解码器就绪: 输入 {}x{}, 网格 {:?}, 类别 {}",
      input_width,
      input_height,
      grids,
      num_elements - YOLOX_BOX_ELEMENTS
    );

    Ok(YoloxDecoder {
      input_width,
      input_height,
      grids,
      num_cells,
      num_classes: num_elements - YOLOX_BOX_ELEMENTS,
      det_threshold: YOLOX_DET_THRESHOLD,
    })
  }

  pub fn with_threshold(mut self, det_threshold: f32) -> Self {
    self.det_threshold = det_threshold;
    self
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn num_cells(&self) -> usize {
    self.num_cells
  }

  /// 解码一帧输出张量，按扫描顺序给出候选检测
  ///
  /// 扫描顺序是与推理引擎的布局契约: 步长 8、16、32 依次，
  /// 每个尺度内按行优先（y 外层, x 内层）。
  pub fn decode(&self, output: &TensorView) -> Result<Vec<DetectItem>, YoloxError> {
    let num_elements = YOLOX_BOX_ELEMENTS + self.num_classes;
    let expected = self.num_cells * num_elements;
    if output.len() != expected {
      error!(
        "输出缓冲区长度与形状不符: 期望 {}, 实际 {}",
        expected,
        output.len()
      );
      return Err(YoloxError::BufferLengthMismatch {
        expected,
        actual: output.len(),
      });
    }

    let input_width = self.input_width as f32;
    let input_height = self.input_height as f32;
    let mut items = Vec::new();
    let mut offset = 0;

    for (&(grid_height, grid_width), stride) in self.grids.iter().zip(YOLOX_STRIDES) {
      let stride = stride as f32;
      for cell_y in 0..grid_height {
        for cell_x in 0..grid_width {
          // 类别取最大值，严格大于保证并列时最小索引胜出
          let mut max_score = output.get(offset + YOLOX_BOX_ELEMENTS);
          let mut max_class = 0usize;
          for class in 1..self.num_classes {
            let score = output.get(offset + YOLOX_BOX_ELEMENTS + class);
            if score > max_score {
              max_score = score;
              max_class = class;
            }
          }

          let objectness = output.get(offset + 4);
          let score = max_score * objectness;

          if score >= self.det_threshold {
            let cx = output.get(offset);
            let cy = output.get(offset + 1);
            let w = output.get(offset + 2);
            let h = output.get(offset + 3);

            let center_x = (cx + cell_x as f32) * stride;
            let center_y = (cy + cell_y as f32) * stride;
            // "+1" 是训练期的框参数化的一部分，不是可调参数
            let box_w = w.exp() * stride + 1.0;
            let box_h = h.exp() * stride + 1.0;

            items.push(DetectItem {
              class_id: max_class as u32,
              score,
              bbox: [
                (center_x - box_w / 2.0) / input_width,
                (center_y - box_h / 2.0) / input_height,
                (center_x + box_w / 2.0) / input_width,
                (center_y + box_h / 2.0) / input_height,
              ],
            });
          }

          offset += num_elements;
        }
      }
    }

    debug!("解码得到 {} 个候选", items.len());

    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::{Quantization, TensorType};

  const NUM_ELEMENTS: usize = 85;
  const NUM_CELLS: usize = 3549; // 52*52 + 26*26 + 13*13

  fn input_desc() -> TensorDesc {
    TensorDesc {
      shape: Box::new([1, 416, 416, 3]),
      tensor_type: TensorType::UInt8,
      quantization: Box::new([Quantization {
        scale: 1.0,
        zero_point: 0,
      }]),
    }
  }

  fn output_desc(num_cells: usize) -> TensorDesc {
    TensorDesc {
      shape: Box::new([1, num_cells, NUM_ELEMENTS]),
      tensor_type: TensorType::UInt8,
      quantization: Box::new([Quantization {
        scale: 1.0,
        zero_point: 0,
      }]),
    }
  }

  #[test]
  fn canonical_head_matches_cell_count() {
    let decoder = YoloxDecoder::new(&input_desc(), &output_desc(NUM_CELLS)).unwrap();
    assert_eq!(decoder.num_cells(), 3549);
    assert_eq!(decoder.num_classes(), 80);
  }

  #[test]
  fn cell_count_mismatch_is_structural() {
    let result = YoloxDecoder::new(&input_desc(), &output_desc(NUM_CELLS + 1));
    assert!(matches!(
      result,
      Err(YoloxError::CellCountMismatch {
        expected: 3549,
        actual: 3550,
      })
    ));
  }

  #[test]
  fn output_must_have_class_elements() {
    let mut desc = output_desc(NUM_CELLS);
    desc.shape = Box::new([1, NUM_CELLS, 5]);
    assert!(matches!(
      YoloxDecoder::new(&input_desc(), &desc),
      Err(YoloxError::InvalidOutputShape(_))
    ));
  }

  #[test]
  fn quantization_count_checked_at_construction() {
    let mut desc = output_desc(NUM_CELLS);
    let pair = Quantization {
      scale: 1.0,
      zero_point: 0,
    };
    desc.quantization = Box::new([pair, pair]);
    assert!(matches!(
      YoloxDecoder::new(&input_desc(), &desc),
      Err(YoloxError::Tensor(TensorError::QuantizationCount(2)))
    ));
  }

  #[test]
  fn buffer_length_mismatch_is_structural() {
    let decoder = YoloxDecoder::new(&input_desc(), &output_desc(NUM_CELLS)).unwrap();
    let desc = output_desc(NUM_CELLS);
    let data = vec![0u8; NUM_CELLS * NUM_ELEMENTS - 1];
    let view = TensorView::quantized(&data, &desc).unwrap();
    assert!(matches!(
      decoder.decode(&view),
      Err(YoloxError::BufferLengthMismatch { .. })
    ));
  }

  #[test]
  fn all_zero_tensor_yields_no_candidates() {
    let decoder = YoloxDecoder::new(&input_desc(), &output_desc(NUM_CELLS)).unwrap();
    let desc = output_desc(NUM_CELLS);
    let data = vec![0u8; NUM_CELLS * NUM_ELEMENTS];
    let view = TensorView::quantized(&data, &desc).unwrap();
    assert!(decoder.decode(&view).unwrap().is_empty());
  }

  #[test]
  fn single_hot_cell_decodes_expected_box() {
    let decoder = YoloxDecoder::new(&input_desc(), &output_desc(NUM_CELLS)).unwrap();
    let desc = output_desc(NUM_CELLS);
    let mut data = vec![0u8; NUM_CELLS * NUM_ELEMENTS];

    // 步长 8, 格子 (x=5, y=2)
    let offset = (2 * 52 + 5) * NUM_ELEMENTS;
    data[offset + 4] = u8::MAX; // objectness
    data[offset + 5 + 7] = u8::MAX; // 类别 7

    let view = TensorView::quantized(&data, &desc).unwrap();
    let items = decoder.decode(&view).unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.class_id, 7);
    assert_eq!(item.score, 255.0 * 255.0);

    // center = (0 + 格子坐标) * 8, 宽高 = exp(0) * 8 + 1 = 9
    let expected = [
      (40.0 - 4.5) / 416.0,
      (16.0 - 4.5) / 416.0,
      (40.0 + 4.5) / 416.0,
      (16.0 + 4.5) / 416.0,
    ];
    for (got, want) in item.bbox.iter().zip(expected) {
      assert!((got - want).abs() < 1e-6);
    }
  }

  #[test]
  fn float_path_skips_dequantization() {
    let input = input_desc();
    let mut output = output_desc(NUM_CELLS);
    output.tensor_type = TensorType::Float32;
    output.quantization = Box::new([]);
    let decoder = YoloxDecoder::new(&input, &output).unwrap();

    let mut data = vec![0.0f32; NUM_CELLS * NUM_ELEMENTS];
    // 步长 32, 格子 (x=1, y=1): 全局格子索引 52*52 + 26*26 + 14
    let offset = (52 * 52 + 26 * 26 + 14) * NUM_ELEMENTS;
    data[offset] = 0.25; // cx
    data[offset + 1] = 0.75; // cy
    data[offset + 4] = 0.5; // objectness
    data[offset + 5 + 2] = 0.9; // 类别 2

    let items = decoder.decode(&TensorView::float(&data)).unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.class_id, 2);
    assert!((item.score - 0.45).abs() < 1e-6);

    // center_x = (0.25 + 1) * 32 = 40, center_y = (0.75 + 1) * 32 = 56, 宽高 = 33
    let expected = [
      (40.0 - 16.5) / 416.0,
      (56.0 - 16.5) / 416.0,
      (40.0 + 16.5) / 416.0,
      (56.0 + 16.5) / 416.0,
    ];
    for (got, want) in item.bbox.iter().zip(expected) {
      assert!((got - want).abs() < 1e-6);
    }
  }

  #[test]
  fn candidates_follow_scan_order() {
    let decoder = YoloxDecoder::new(&input_desc(), &output_desc(NUM_CELLS)).unwrap();
    let desc = output_desc(NUM_CELLS);
    let mut data = vec![0u8; NUM_CELLS * NUM_ELEMENTS];

    // 步长 16 的第一个格子，和步长 8 的最后一个格子
    let late_scale = (52 * 52) * NUM_ELEMENTS;
    let early_scale = (52 * 52 - 1) * NUM_ELEMENTS;
    for offset in [late_scale, early_scale] {
      data[offset + 4] = u8::MAX;
      data[offset + 5] = u8::MAX;
    }

    let items = decoder
      .decode(&TensorView::quantized(&data, &desc).unwrap())
      .unwrap();
    assert_eq!(items.len(), 2);
    // 步长 8 的格子先被发出
    assert!(items[0].bbox[0] > items[1].bbox[0]);
    assert!(items[0].bbox[1] > items[1].bbox[1]);
  }

  #[test]
  fn class_tie_keeps_lowest_index() {
    let decoder = YoloxDecoder::new(&input_desc(), &output_desc(NUM_CELLS)).unwrap();
    let desc = output_desc(NUM_CELLS);
    let mut data = vec![0u8; NUM_CELLS * NUM_ELEMENTS];
    data[4] = u8::MAX;
    data[5 + 30] = 200;
    data[5 + 60] = 200;

    let items = decoder
      .decode(&TensorView::quantized(&data, &desc).unwrap())
      .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 30);
  }
}
