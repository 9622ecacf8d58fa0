use crate::{MlErr, Result};

/// Runs `step` over every time slice of `inputs`, threading the state through.
///
/// The step at time `t` receives the state produced by the step at `t - 1`, the first one gets
/// `initial_state`. Steps run strictly in order and exactly once per slice.
///
/// # Arguments
/// * `step` - The step function, mapping an input slice and the previous state to the step's
///   output and the new state.
/// * `inputs` - The time slices of the input sequence.
/// * `initial_state` - The state given to the first step.
///
/// # Returns
/// A tuple of the last output, every output in time order and the final state, or an error if
/// `inputs` is empty or a step failed.
pub fn rnn<I, S, O, F>(mut step: F, inputs: I, initial_state: S) -> Result<(O, Vec<O>, S)>
where
    I: IntoIterator,
    O: Clone,
    F: FnMut(I::Item, S) -> Result<(O, S)>,
{
    let inputs = inputs.into_iter();
    let mut outputs = Vec::with_capacity(inputs.size_hint().0);
    let mut state = initial_state;

    for input in inputs {
        let (output, new_state) = step(input, state)?;
        outputs.push(output);
        state = new_state;
    }

    let last_output = outputs.last().cloned().ok_or(MlErr::EmptyEpisode)?;
    Ok((last_output, outputs, state))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, array};

    use super::*;

    #[test]
    fn threads_state_in_order() {
        let inputs = [1, 2, 3, 4];

        let (last, outputs, state) = rnn(
            |x, (sum, seen): (i32, Vec<i32>)| {
                let mut seen = seen;
                seen.push(x);
                Ok((sum + x, (sum + x, seen)))
            },
            inputs,
            (0, vec![]),
        )
        .unwrap();

        assert_eq!(last, 10);
        assert_eq!(outputs, [1, 3, 6, 10]);
        assert_eq!(state, (10, vec![1, 2, 3, 4]));
    }

    #[test]
    fn keeps_tuple_state_shapes() {
        let xs = [array![1., 1.], array![2., 2.]];
        let initial = (Array1::<f32>::zeros(2), Array1::<f32>::ones(3));

        let (_, _, (h, c)) = rnn(
            |x: &Array1<f32>, (h, c): (Array1<f32>, Array1<f32>)| {
                let h = h + x;
                Ok((h.sum(), (h, c * 2.)))
            },
            &xs,
            initial,
        )
        .unwrap();

        assert_eq!(h, array![3., 3.]);
        assert_eq!(c, array![4., 4., 4.]);
    }

    #[test]
    fn stops_on_the_first_failure() {
        let mut calls = 0;

        let result = rnn(
            |x: i32, s: i32| {
                calls += 1;
                if x == 2 {
                    return Err(MlErr::InvalidConfig("boom"));
                }
                Ok((x, s + x))
            },
            [1, 2, 3],
            0,
        );

        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn empty_sequences_fail() {
        let result = rnn(|x: i32, s: i32| Ok((x, s)), [], 0);

        assert!(matches!(result, Err(MlErr::EmptyEpisode)));
    }
}
