//! Code for loading and running local TorchScript models

use super::{check_task, Inference, InferenceTask, InputData, Oracle, Pipeline, Prediction};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;
use tch::{no_grad, IValue, Kind, Tensor};

/// Detections scoring below this are dropped
const SCORE_THRESHOLD: f64 = 0.5;

/// COCO category names, indexed by the label ids torchvision detectors emit
const COCO_LABELS: [&str; 91] = [
    "__background__", "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train",
    "truck", "boat", "traffic light", "fire hydrant", "N/A", "stop sign", "parking meter",
    "bench", "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "N/A", "backpack", "umbrella", "N/A", "N/A", "handbag", "tie", "suitcase",
    "frisbee", "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "N/A", "wine glass", "cup", "fork",
    "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange", "broccoli", "carrot",
    "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant", "bed", "N/A",
    "dining table", "N/A", "N/A", "toilet", "N/A", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "N/A",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// A scripted torchvision detector (Faster R-CNN, RetinaNet, ...)
#[derive(Debug)]
pub struct TorchOracle {
    /// The loaded torch model
    model: Arc<tch::CModule>,
    filename: String,
}

impl TorchOracle {
    pub fn load(pipeline: Pipeline, filename: &str) -> Result<Self> {
        if pipeline != Pipeline::ObjectDetection {
            bail!("the torch backend only serves object-detection, not {pipeline}");
        }
        let mut model = tch::CModule::load(filename)?;
        model.set_eval();
        Ok(TorchOracle {
            model: Arc::new(model),
            filename: filename.to_string(),
        })
    }
}

#[async_trait]
impl Oracle for TorchOracle {
    fn pipeline(&self) -> Pipeline {
        Pipeline::ObjectDetection
    }

    fn model(&self) -> &str {
        &self.filename
    }

    async fn run(&self, task: InferenceTask) -> Result<Inference> {
        check_task(self, &task)?;
        let image = match task.data {
            InputData::Image(image) => image,
            other => bail!("invalid input {other:?} for object detection"),
        };

        // The forward pass blocks for a while, run it off the async workers
        let model = self.model.clone();
        let predictions = tokio::task::spawn_blocking(move || detect(&model, &image)).await??;
        Ok(Inference::Predictions(predictions))
    }
}

/// Convert an RGB image to a float CHW tensor in [0, 1]
fn to_tensor(image: &RgbImage) -> Tensor {
    let (width, height) = image.dimensions();
    Tensor::from_slice(image.as_raw())
        .view([height as i64, width as i64, 3])
        .permute([2, 0, 1])
        .to_kind(Kind::Float)
        / 255.
}

fn detect(model: &tch::CModule, image: &RgbImage) -> Result<Vec<Prediction>> {
    let input = IValue::TensorList(vec![to_tensor(image)]);
    let output = no_grad(|| model.forward_is(&[input]))?;

    // Scripted detectors return (losses, detections)
    let detections = match output {
        IValue::Tuple(mut parts) if parts.len() == 2 => parts.remove(1),
        other => other,
    };
    let first = match detections {
        IValue::GenericList(mut list) | IValue::Tuple(mut list) if !list.is_empty() => {
            list.remove(0)
        }
        _ => return Err(anyhow!("object detection returned no detections list")),
    };
    let fields = match first {
        IValue::GenericDict(fields) => fields,
        _ => return Err(anyhow!("object detection returned an unexpected value")),
    };

    let tensor = |name: &str| {
        fields
            .iter()
            .find(|(key, _)| matches!(key, IValue::String(s) if s == name))
            .and_then(|(_, value)| match value {
                IValue::Tensor(t) => Some(t.shallow_clone()),
                _ => None,
            })
            .ok_or_else(|| anyhow!("object detection output has no {name:?} tensor"))
    };
    let labels = Vec::<i64>::try_from(tensor("labels")?.to_kind(Kind::Int64))?;
    let scores = Vec::<f64>::try_from(tensor("scores")?.to_kind(Kind::Double))?;

    Ok(labels
        .into_iter()
        .zip(scores)
        .filter(|(_, score)| *score >= SCORE_THRESHOLD)
        .map(|(label, score)| {
            let name = usize::try_from(label)
                .ok()
                .and_then(|i| COCO_LABELS.get(i))
                .map(|l| l.to_string())
                .unwrap_or_else(|| format!("LABEL_{label}"));
            Prediction::new(name, score)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_other_pipelines() {
        let err = TorchOracle::load(Pipeline::Translation, "models/any.pt").unwrap_err();
        assert!(err.to_string().contains("only serves object-detection"));
    }

    #[test]
    fn test_to_tensor_layout() {
        let image = RgbImage::from_pixel(3, 2, image::Rgb([255, 0, 51]));
        let t = to_tensor(&image);
        assert_eq!(t.size(), vec![3, 2, 3]);
        assert_eq!(t.double_value(&[0, 1, 2]), 1.0);
        assert!((t.double_value(&[2, 0, 0]) - 0.2).abs() < 1e-6);
    }

    #[actix_web::test]
    #[ignore = "needs a scripted detector at models/faster_rcnn.pt"]
    async fn test_faster_rcnn() {
        let oracle = TorchOracle::load(Pipeline::ObjectDetection, "models/faster_rcnn.pt").unwrap();
        let task = InferenceTask {
            data: InputData::Image(RgbImage::new(64, 64)),
            inference_type: crate::oracle::InferenceType::ObjectDetection,
        };
        let outputs = oracle.run(task).await.unwrap();
        println!("outputs: {outputs:#?}");
    }
}
