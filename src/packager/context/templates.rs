//! Fixed templates staged into every build context.
//!
//! Bump [`TEMPLATE_VERSION`] whenever any template text changes; the version is
//! written into the generated files so two contexts can be compared.

/// Version of the template set below
pub const TEMPLATE_VERSION: u32 = 1;

/// Build descriptor file name
pub const DESCRIPTOR_FILE: &str = "Dockerfile";

/// Entry point file name
pub const ENTRY_POINT_FILE: &str = "infer.py";

/// Dependency manifest file name
pub const MANIFEST_FILE: &str = "requirements.txt";

/// Build descriptor rendered from a `BuildDescriptor`.
pub const DESCRIPTOR_TEMPLATE: &str = r#"# Generated by kodegen_bundler_model (template v{{template_version}}, framework: {{framework}})
FROM {{base_image}}
WORKDIR {{workdir}}
COPY {{manifest.source}} {{manifest.destination}}
RUN {{install_command}}
{{#each files}}
COPY {{this.source}} {{this.destination}}
{{/each}}
CMD {{run_command}}
"#;

/// PyTorch dependency manifest.
pub const PYTORCH_MANIFEST: &str = r#"# kodegen_bundler_model requirements (template v{{template_version}}, framework: pytorch)
torch==2.2.2
torchvision==0.17.2
Pillow==10.3.0
numpy==1.26.4
"#;

/// TensorFlow dependency manifest.
pub const TENSORFLOW_MANIFEST: &str = r#"# kodegen_bundler_model requirements (template v{{template_version}}, framework: tensorflow)
tensorflow==2.15.1
Pillow==10.3.0
numpy==1.26.4
"#;

/// PyTorch entry point. Loads the model by its fixed staged name.
pub const PYTORCH_ENTRY_POINT: &str = r#"#!/usr/bin/env python3
"""Inference entry point generated by kodegen_bundler_model (template v{{template_version}}).

Loads {{model_file}} next to this script and runs one forward pass on an
input image, or on random data when no image is given.
"""
import argparse
import os
import sys

MODEL_FILE = "{{model_file}}"


def resolve(path):
    if os.path.isabs(path):
        return path
    return os.path.join(os.path.dirname(os.path.abspath(__file__)), path)


def main():
    parser = argparse.ArgumentParser(description="Run inference on the packaged PyTorch model")
    parser.add_argument("--model", default=MODEL_FILE, help="Path to the model file")
    parser.add_argument("--test-input", help="Optional input image")
    args = parser.parse_args()

    import torch

    model_path = resolve(args.model)
    if not os.path.exists(model_path):
        print(f"Error: model file not found: {model_path}", file=sys.stderr)
        return 1

    model = torch.load(model_path, map_location=torch.device("cpu"), weights_only=False)
    if hasattr(model, "eval"):
        model.eval()

    if args.test_input and os.path.exists(args.test_input):
        import torchvision.transforms as transforms
        from PIL import Image

        transform = transforms.Compose([
            transforms.Resize(256),
            transforms.CenterCrop(224),
            transforms.ToTensor(),
            transforms.Normalize(mean=[0.485, 0.456, 0.406], std=[0.229, 0.224, 0.225]),
        ])
        image = Image.open(args.test_input).convert("RGB")
        input_tensor = transform(image).unsqueeze(0)
    else:
        print("Using dummy input tensor (no image provided)")
        input_tensor = torch.randn(1, 3, 224, 224)

    with torch.no_grad():
        outputs = model(input_tensor)

    if outputs.dim() == 2 and outputs.shape[0] == 1:
        probabilities = torch.nn.functional.softmax(outputs, dim=1)
        top_k = min(5, outputs.shape[1])
        top_prob, top_indices = torch.topk(probabilities, top_k)
        print(f"Top {top_k} predictions:")
        for rank in range(top_k):
            print(f"   {rank + 1}. Class {top_indices[0][rank].item()}: {top_prob[0][rank].item():.4f}")
    else:
        print(f"Output shape: {tuple(outputs.shape)}")
    return 0


if __name__ == "__main__":
    sys.exit(main())
"#;

/// TensorFlow entry point. Loads the model by its fixed staged name.
pub const TENSORFLOW_ENTRY_POINT: &str = r#"#!/usr/bin/env python3
"""Inference entry point generated by kodegen_bundler_model (template v{{template_version}}).

Loads {{model_file}} next to this script and runs one forward pass on an
input image, or on random data when no image is given.
"""
import argparse
import os
import sys

MODEL_FILE = "{{model_file}}"


def resolve(path):
    if os.path.isabs(path):
        return path
    return os.path.join(os.path.dirname(os.path.abspath(__file__)), path)


def main():
    parser = argparse.ArgumentParser(description="Run inference on the packaged TensorFlow model")
    parser.add_argument("--model", default=MODEL_FILE, help="Path to the model file")
    parser.add_argument("--test-input", help="Optional input image")
    args = parser.parse_args()

    import numpy as np
    import tensorflow as tf

    model_path = resolve(args.model)
    if not os.path.exists(model_path):
        print(f"Error: model file not found: {model_path}", file=sys.stderr)
        return 1

    model = tf.keras.models.load_model(model_path)
    height, width = 224, 224
    shape = getattr(model, "input_shape", None)
    if isinstance(shape, tuple) and len(shape) == 4 and shape[1] and shape[2]:
        height, width = shape[1], shape[2]

    if args.test_input and os.path.exists(args.test_input):
        from PIL import Image

        image = Image.open(args.test_input).convert("RGB").resize((width, height))
        input_data = np.expand_dims(np.array(image, dtype=np.float32) / 255.0, axis=0)
    else:
        print("Using dummy input tensor (no image provided)")
        input_data = np.random.rand(1, height, width, 3).astype(np.float32)

    output = model(input_data, training=False)
    if len(output.shape) == 2 and output.shape[0] == 1:
        probabilities = tf.nn.softmax(output, axis=1).numpy()[0]
        top_k = min(5, len(probabilities))
        print(f"Top {top_k} predictions:")
        for rank, index in enumerate(np.argsort(probabilities)[-top_k:][::-1]):
            print(f"   {rank + 1}. Class {index}: {probabilities[index]:.4f}")
    else:
        print(f"Output shape: {tuple(output.shape)}")
    return 0


if __name__ == "__main__":
    sys.exit(main())
"#;
